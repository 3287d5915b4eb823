fn main() {
    // The Tauri context (tauri.conf.json, capabilities) is only needed by the desktop shell.
    #[cfg(feature = "app")]
    tauri_build::build();
}

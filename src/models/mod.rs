mod reading;

pub use reading::{StepReading, StepSource};

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::models::StepSource;

/// Failures raised by a connector while talking to its provider.
#[derive(Debug)]
pub enum ConnectorError {
    PermissionDenied,
    Unconfigured(String),
    Http { status: u16, endpoint: String },
    Network(String),
    InvalidResponse(String),
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorError::PermissionDenied => write!(f, "permission denied"),
            ConnectorError::Unconfigured(what) => write!(f, "not configured: {}", what),
            ConnectorError::Http { status, endpoint } => {
                write!(f, "HTTP {} from {}", status, endpoint)
            }
            ConnectorError::Network(msg) => write!(f, "network error: {}", msg),
            ConnectorError::InvalidResponse(msg) => write!(f, "invalid response: {}", msg),
        }
    }
}

impl std::error::Error for ConnectorError {}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ConnectorError::Http {
                status: status.as_u16(),
                endpoint: err
                    .url()
                    .map(|url| url.to_string())
                    .unwrap_or_default(),
            },
            None if err.is_decode() => ConnectorError::InvalidResponse(err.to_string()),
            None => ConnectorError::Network(err.to_string()),
        }
    }
}

/// What the aggregator reports at its boundary. Every variant is logged, surfaced
/// once per session, and leaves the affected source disconnected.
#[derive(Debug)]
pub enum TrackerError {
    PermissionDenied { source: StepSource },
    Timeout { source: StepSource, after: Duration },
    Unconfigured { source: StepSource, detail: String },
    ConnectorFailed { source: StepSource, detail: String },
    PersistenceFailure { source: Option<StepSource>, detail: String },
}

impl TrackerError {
    pub fn from_connector(source: StepSource, err: ConnectorError) -> Self {
        match err {
            ConnectorError::PermissionDenied => TrackerError::PermissionDenied { source },
            ConnectorError::Unconfigured(detail) => TrackerError::Unconfigured { source, detail },
            other => TrackerError::ConnectorFailed {
                source,
                detail: other.to_string(),
            },
        }
    }

    /// The source left disconnected by this error, if any.
    pub fn source(&self) -> Option<StepSource> {
        match self {
            TrackerError::PermissionDenied { source }
            | TrackerError::Timeout { source, .. }
            | TrackerError::Unconfigured { source, .. }
            | TrackerError::ConnectorFailed { source, .. } => Some(*source),
            TrackerError::PersistenceFailure { source, .. } => *source,
        }
    }

    pub fn kind(&self) -> NoticeKind {
        match self {
            TrackerError::PermissionDenied { .. } => NoticeKind::PermissionDenied,
            TrackerError::Timeout { .. } => NoticeKind::Timeout,
            TrackerError::Unconfigured { .. } => NoticeKind::Unconfigured,
            TrackerError::ConnectorFailed { .. } => NoticeKind::ConnectorFailed,
            TrackerError::PersistenceFailure { .. } => NoticeKind::PersistenceFailure,
        }
    }

    /// Message shown to the user in the one-time notice.
    pub fn user_message(&self) -> String {
        match self {
            TrackerError::PermissionDenied { source } => format!(
                "Step tracking needs permission to read from {}. You can still enter steps manually.",
                source
            ),
            TrackerError::Timeout { source, .. }
            | TrackerError::Unconfigured { source, .. }
            | TrackerError::ConnectorFailed { source, .. } => format!(
                "Couldn't connect to {}. Automatic tracking is off for now; enter steps manually.",
                source
            ),
            TrackerError::PersistenceFailure { .. } => {
                "Your changes couldn't be saved right now. We'll keep trying.".to_string()
            }
        }
    }
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerError::PermissionDenied { source } => {
                write!(f, "{}: permission denied", source)
            }
            TrackerError::Timeout { source, after } => {
                write!(f, "{}: no reading within {}ms", source, after.as_millis())
            }
            TrackerError::Unconfigured { source, detail } => {
                write!(f, "{}: not configured ({})", source, detail)
            }
            TrackerError::ConnectorFailed { source, detail } => {
                write!(f, "{}: connection failed ({})", source, detail)
            }
            TrackerError::PersistenceFailure {
                source: Some(source),
                detail,
            } => write!(f, "{}: failed to persist ({})", source, detail),
            TrackerError::PersistenceFailure {
                source: None,
                detail,
            } => write!(f, "failed to persist ({})", detail),
        }
    }
}

impl std::error::Error for TrackerError {}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NoticeKind {
    PermissionDenied,
    Timeout,
    Unconfigured,
    ConnectorFailed,
    PersistenceFailure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_errors_collapse_into_boundary_kinds() {
        let unconfigured = TrackerError::from_connector(
            StepSource::GoogleFit,
            ConnectorError::Unconfigured("access token".into()),
        );
        assert_eq!(unconfigured.kind(), NoticeKind::Unconfigured);
        assert_eq!(unconfigured.source(), Some(StepSource::GoogleFit));

        let http = TrackerError::from_connector(
            StepSource::AppleHealth,
            ConnectorError::Http {
                status: 503,
                endpoint: "https://bridge.local/steps".into(),
            },
        );
        assert_eq!(http.kind(), NoticeKind::ConnectorFailed);
        assert!(http.to_string().contains("HTTP 503"));
    }

    #[test]
    fn timeout_message_names_the_budget() {
        let err = TrackerError::Timeout {
            source: StepSource::Device,
            after: Duration::from_millis(5000),
        };
        assert_eq!(err.to_string(), "device: no reading within 5000ms");
        assert!(err.user_message().contains("manually"));
    }
}

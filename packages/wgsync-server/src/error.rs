use thiserror::Error;
use wgsync_crypto::CryptoError;
use wgsync_proto::ProtoError;

/// Coarse classification of [`ServerError`] for callers that map failures
/// onto responses or exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    ExternalTool,
    Storage,
    Internal,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Proto(#[from] ProtoError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Tokio task join error: {0}")]
    TokioJoin(#[from] tokio::task::JoinError),

    #[error("At least one config directory must be specified")]
    NoConfigDirs,

    #[error("Device {0} not found")]
    DeviceNotFound(String),

    #[error("Peer {0} not found")]
    PeerNotFound(String),

    #[error("Config for device {0} not found")]
    ConfigNotFound(String),

    #[error("Device {0} already exists")]
    DeviceExists(String),

    #[error("Peer {0} already exists")]
    PeerExists(String),

    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Control plane error: {0}")]
    ControlPlane(String),
}

impl ServerError {
    pub fn validation(field: &'static str, reason: impl ToString) -> Self {
        ServerError::Validation {
            field,
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::DeviceNotFound(_)
            | ServerError::PeerNotFound(_)
            | ServerError::ConfigNotFound(_) => ErrorKind::NotFound,
            ServerError::Validation { .. } | ServerError::NoConfigDirs => {
                ErrorKind::Validation
            }
            ServerError::Yaml(_) => ErrorKind::Validation,
            ServerError::DeviceExists(_) | ServerError::PeerExists(_) => ErrorKind::Conflict,
            ServerError::Proto(_) => ErrorKind::ExternalTool,
            ServerError::Io(_) => ErrorKind::Storage,
            ServerError::Crypto(_)
            | ServerError::TokioJoin(_)
            | ServerError::Unsupported(_)
            | ServerError::ControlPlane(_) => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgsync_proto::QuickAction;

    #[test]
    fn test_quick_failures_are_told_apart() {
        let timeout = ServerError::from(ProtoError::QuickTimeout {
            action: QuickAction::Up,
        });
        let root = ServerError::from(ProtoError::PermissionRequired {
            action: QuickAction::Up,
            message: "must be run as root".to_string(),
        });
        let rejected = ServerError::from(ProtoError::ToolFailed {
            tool: "wg-quick up".to_string(),
            code: Some(1),
            message: "Line unrecognized".to_string(),
        });

        for e in [&timeout, &root, &rejected] {
            assert_eq!(e.kind(), ErrorKind::ExternalTool);
        }
        assert!(timeout.to_string().contains("timed out"));
        assert!(root.to_string().contains("requires root"));
        assert!(rejected.to_string().contains("Line unrecognized"));
    }

    #[test]
    fn test_validation_names_the_field() {
        let e = ServerError::validation("allowed_ips", "bogus is not a CIDR");
        assert_eq!(e.kind(), ErrorKind::Validation);
        assert_eq!(e.to_string(), "Invalid allowed_ips: bogus is not a CIDR");
    }

    #[test]
    fn test_not_found_is_distinct_from_conflict() {
        assert!(ServerError::DeviceNotFound("wg0".into()).is_not_found());
        assert_eq!(
            ServerError::DeviceExists("wg0".into()).kind(),
            ErrorKind::Conflict
        );
    }
}

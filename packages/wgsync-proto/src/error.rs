use crate::command::QuickAction;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("`{program}` did not finish within {after:?}")]
    Timeout { program: String, after: Duration },

    #[error("wg-quick {action} timed out (likely waiting for a sudo password): run wgsync as root")]
    QuickTimeout { action: QuickAction },

    #[error("wg-quick {action} requires root privileges: {message}")]
    PermissionRequired { action: QuickAction, message: String },

    #[error("{tool} failed (exit code {code:?}): {message}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        message: String,
    },
}

pub mod command;
pub(crate) mod error;
pub mod wgquick;

pub type ProtoResult<T> = core::result::Result<T, error::ProtoError>;

pub use command::{
    CommandOutput, CommandRunner, CommandSpec, QuickAction, SystemCommandRunner, WgTool,
};
pub use error::ProtoError;
pub use wgquick::{WgQuickConfig, WgQuickInterface, WgQuickPeer};

pub(crate) mod config;
pub(crate) mod control;
pub(crate) mod device;
pub(crate) mod dump;
pub(crate) mod engine;
pub(crate) mod error;
pub(crate) mod paginate;
pub(crate) mod peer;
pub(crate) mod secret;
pub(crate) mod store;
pub(crate) mod wireguard;

pub type ServerResult<T> = core::result::Result<T, error::ServerError>;

pub use config::Config;
pub use control::{
    ControlPlane, DeviceUpdate, LiveDevice, LivePeer, MemoryControlPlane, PeerUpdate,
};
pub use device::DeviceService;
pub use dump::{DumpReport, DumpScheduler, Snapshotter};
pub use engine::Engine;
pub use error::{ErrorKind, ServerError};
pub use paginate::{link_header, paginate, Pagination};
pub use peer::{filter_peers, parse_peer_ref, sort_peers, PeerService, PeerSort, SortField};
pub use secret::{FileSecretStore, MemorySecretStore, SecretStore};
pub use store::{validate_device_name, ConfigBackend, ConfigStore, FileBackend, MemoryBackend};
pub use wireguard::WgControlPlane;

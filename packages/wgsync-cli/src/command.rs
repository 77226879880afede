pub(crate) mod daemon;
pub(crate) mod device;
pub(crate) mod devices;
pub(crate) mod dump;
pub(crate) mod peer;
pub(crate) mod peers;
pub(crate) mod quick;
pub(crate) mod version;

pub const CONFIG_FILE_EXTENSION: &str = "conf";

pub const WGSYNC_CONFIG_REALPATH: &str = "/etc/wgsync/wgsync.yaml";

pub const WGSYNC_SECRETS_DIR: &str = "/var/lib/wgsync";

pub const DEFAULT_PER_PAGE: i64 = 100;

pub const DEFAULT_DUMP_INTERVAL_SECS: u64 = 600;

pub const WG_QUICK_TIMEOUT_SECS: u64 = 30;

pub const LINUX_CONFIG_DIRS: &[&str] = &["/etc/wireguard"];

pub const BSD_CONFIG_DIRS: &[&str] = &[
    "/etc/wireguard",
    "/usr/local/etc/wireguard",
    "/opt/homebrew/etc/wireguard",
];

/// Directories wg-quick itself searches on this platform, in order.
pub fn default_config_dirs() -> &'static [&'static str] {
    if cfg!(any(target_os = "macos", target_os = "freebsd")) {
        BSD_CONFIG_DIRS
    } else {
        LINUX_CONFIG_DIRS
    }
}

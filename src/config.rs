//! Run configuration.

use crate::store::DEFAULT_STORAGE_DIR;
use std::path::{Path, PathBuf};

/// Hive file holding `HKEY_LOCAL_MACHINE\SYSTEM`, relative to the Windows
/// partition root.
pub const SYSTEM_HIVE_PATH: [&str; 4] = ["Windows", "System32", "config", "SYSTEM"];

/// Key holding the pairing keys, relative to the SYSTEM hive.
pub const BTHPORT_KEYS_PATH: &str = r"ControlSet001\Services\BTHPORT\Parameters\Keys";

/// Mount prefix passed to `reged` for the SYSTEM hive.
pub const SYSTEM_HIVE_PREFIX: &str = r"HKEY_LOCAL_MACHINE\SYSTEM";

/// Default registry export tool (from chntpw).
pub const DEFAULT_EXPORTER: &str = "reged";

/// Settings for one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// BlueZ storage directory.
    pub storage_dir: PathBuf,
    /// Key to export, relative to the SYSTEM hive.
    pub key_path: String,
    /// Program used to export the key.
    pub exporter: PathBuf,
}

impl SyncConfig {
    /// Returns the SYSTEM hive below a mounted Windows root.
    pub fn system_hive(windows_root: &Path) -> PathBuf {
        SYSTEM_HIVE_PATH
            .iter()
            .fold(windows_root.to_path_buf(), |path, part| path.join(part))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            key_path: BTHPORT_KEYS_PATH.to_string(),
            exporter: PathBuf::from(DEFAULT_EXPORTER),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_hive() {
        assert_eq!(
            SyncConfig::system_hive(Path::new("/mnt/win")),
            PathBuf::from("/mnt/win/Windows/System32/config/SYSTEM")
        );
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.storage_dir, PathBuf::from("/var/lib/bluetooth"));
        assert!(config.key_path.ends_with(r"BTHPORT\Parameters\Keys"));
    }
}

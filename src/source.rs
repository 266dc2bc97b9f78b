//! Where the registry export text comes from.
//!
//! Either `reged` exports the key from the SYSTEM hive of a mounted Windows
//! partition, or the operator supplies a `.reg` file saved by `regedit`,
//! which is UTF-16LE.

use crate::config::{SyncConfig, SYSTEM_HIVE_PREFIX};
use crate::error::{Result, SyncError};
use encoding_rs::{Encoding, UTF_16LE, UTF_8};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, instrument, warn};

/// Name of the file `reged` writes into its scratch directory.
const EXPORT_FILE: &str = "exported.reg";

/// Produces export text for a key of a Windows installation.
pub trait RegistryExporter {
    /// Exports `key_path` (relative to the SYSTEM hive) from the Windows
    /// installation mounted at `windows_root`.
    fn export_registry(&self, windows_root: &Path, key_path: &str) -> Result<String>;
}

impl<F> RegistryExporter for F
where
    F: Fn(&Path, &str) -> Result<String>,
{
    fn export_registry(&self, windows_root: &Path, key_path: &str) -> Result<String> {
        self(windows_root, key_path)
    }
}

/// Exports with chntpw's `reged -x`.
#[derive(Debug, Clone)]
pub struct Reged {
    program: PathBuf,
}

impl Reged {
    /// Uses the given `reged` binary.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl RegistryExporter for Reged {
    #[instrument(skip(self), fields(program = %self.program.display()))]
    fn export_registry(&self, windows_root: &Path, key_path: &str) -> Result<String> {
        let hive = SyncConfig::system_hive(windows_root);
        if !hive.is_file() {
            return Err(SyncError::ExternalToolFailure(format!(
                "SYSTEM hive not found at {}",
                hive.display()
            )));
        }

        let scratch = tempfile::tempdir()?;
        let export = scratch.path().join(EXPORT_FILE);
        let output = Command::new(&self.program)
            .arg("-x")
            .arg(&hive)
            .arg(SYSTEM_HIVE_PREFIX)
            .arg(key_path)
            .arg(&export)
            .output()
            .map_err(|e| {
                SyncError::ExternalToolFailure(format!(
                    "cannot run {}: {e}",
                    self.program.display()
                ))
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            warn!(status = %output.status, "reged exited with failure status");
            return Err(SyncError::ExternalToolFailure(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        let bytes = match fs::read(&export) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            _ => {
                return Err(SyncError::ExternalToolFailure(format!(
                    "{} produced no export: {}",
                    self.program.display(),
                    stderr.trim()
                )))
            }
        };
        debug!(bytes = bytes.len(), "Read reged export");
        Ok(decode_export(&bytes, UTF_8))
    }
}

/// Where to take the export from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpSource {
    /// Export from a mounted Windows partition.
    WindowsDir(PathBuf),
    /// Read a saved `.reg` file.
    RegistryFile(PathBuf),
}

impl DumpSource {
    /// Returns the export text.
    pub fn read<E: RegistryExporter + ?Sized>(
        &self,
        config: &SyncConfig,
        exporter: &E,
    ) -> Result<String> {
        match self {
            Self::WindowsDir(root) => exporter.export_registry(root, &config.key_path),
            Self::RegistryFile(path) => read_registry_file(path),
        }
    }
}

/// Reads a `.reg` file saved by `regedit`.
pub fn read_registry_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let bytes = fs::read(path.as_ref())?;
    Ok(decode_export(&bytes, UTF_16LE))
}

/// Decodes export bytes. A byte order mark wins over `default`.
pub fn decode_export(bytes: &[u8], default: &'static Encoding) -> String {
    let (text, encoding, had_errors) = default.decode(bytes);
    if had_errors {
        warn!(encoding = encoding.name(), "Export contained undecodable bytes");
    }
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(text: &str, bom: bool) -> Vec<u8> {
        let mut bytes = if bom { vec![0xFF, 0xFE] } else { Vec::new() };
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_decode_utf16le() {
        let text = "Windows Registry Editor Version 5.00\r\n";
        assert_eq!(decode_export(&utf16le(text, true), UTF_16LE), text);
        assert_eq!(decode_export(&utf16le(text, false), UTF_16LE), text);
    }

    #[test]
    fn test_bom_wins() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"[a]\r\n");
        assert_eq!(decode_export(&bytes, UTF_16LE), "[a]\r\n");
    }

    #[test]
    fn test_read_registry_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.reg");
        fs::write(&path, utf16le("[x]\r\n", true)).unwrap();
        assert_eq!(read_registry_file(&path).unwrap(), "[x]\r\n");
    }

    #[test]
    fn test_windows_dir_uses_exporter() {
        let config = SyncConfig::default();
        let exporter = |root: &Path, key: &str| -> Result<String> {
            Ok(format!("{}|{}", root.display(), key))
        };
        let text = DumpSource::WindowsDir(PathBuf::from("/mnt/win"))
            .read(&config, &exporter)
            .unwrap();
        assert_eq!(text, format!("/mnt/win|{}", config.key_path));
    }

    /// Serializes tests that spawn scripts, so no fork inherits a script
    /// still open for writing.
    #[cfg(unix)]
    static SPAWN: std::sync::Mutex<()> = std::sync::Mutex::new(());

    /// Creates a Windows root with a placeholder SYSTEM hive and an executable
    /// stand-in for `reged` running `body`. The output path is `$5`.
    #[cfg(unix)]
    fn fake_reged(body: &str) -> (tempfile::TempDir, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let hive = SyncConfig::system_hive(dir.path());
        fs::create_dir_all(hive.parent().unwrap()).unwrap();
        fs::write(&hive, b"regf").unwrap();

        let script = dir.path().join("reged");
        fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        (dir, script)
    }

    #[cfg(unix)]
    #[test]
    fn test_reged_export_text() {
        let _guard = SPAWN.lock().unwrap_or_else(|e| e.into_inner());
        let (dir, script) = fake_reged("printf '[%s]\\n' \"$4\" > \"$5\"");
        let text = Reged::new(script)
            .export_registry(dir.path(), "Keys")
            .unwrap();
        assert_eq!(text, "[Keys]\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_reged_nonzero_exit() {
        let _guard = SPAWN.lock().unwrap_or_else(|e| e.into_inner());
        let (dir, script) = fake_reged("echo partial > \"$5\"\nexit 3");
        let err = Reged::new(script)
            .export_registry(dir.path(), "Keys")
            .unwrap_err();
        assert!(matches!(err, SyncError::ExternalToolFailure(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_reged_empty_export() {
        let _guard = SPAWN.lock().unwrap_or_else(|e| e.into_inner());
        let (dir, script) = fake_reged(": > \"$5\"");
        let err = Reged::new(script)
            .export_registry(dir.path(), "Keys")
            .unwrap_err();
        assert!(matches!(err, SyncError::ExternalToolFailure(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_reged_cannot_spawn() {
        let _guard = SPAWN.lock().unwrap_or_else(|e| e.into_inner());
        let (dir, _) = fake_reged("exit 0");
        let err = Reged::new(dir.path().join("no-such-reged"))
            .export_registry(dir.path(), "Keys")
            .unwrap_err();
        assert!(matches!(err, SyncError::ExternalToolFailure(ref msg) if msg.contains("cannot run")));
    }

    #[test]
    fn test_reged_missing_hive() {
        let dir = tempfile::tempdir().unwrap();
        let err = Reged::new("reged")
            .export_registry(dir.path(), "Keys")
            .unwrap_err();
        assert!(matches!(err, SyncError::ExternalToolFailure(_)));
    }
}

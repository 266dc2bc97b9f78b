//! BlueZ pairing records and their on-disk store.
//!
//! BlueZ keeps one `info` file per remote device under
//! `/var/lib/bluetooth/<adapter>/<device>/info`, both addresses in colon
//! form. Before a record is overwritten the previous file is copied next to
//! it as `info-YYYYMMDDHHMMSS` so it can be restored by hand. Existing
//! backups are never replaced: a second backup in the same second gets a
//! `.1`, `.2`, ... suffix.

use crate::error::{Result, SyncError};
use crate::ini::Document;
use crate::mac::MacAddress;
use chrono::{Local, NaiveDateTime};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default BlueZ storage directory.
pub const DEFAULT_STORAGE_DIR: &str = "/var/lib/bluetooth";

/// Name of the per-device record file.
pub const INFO_FILE: &str = "info";

/// `strftime` pattern of the backup suffix.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Device name and alias.
pub const GENERAL_SECTION: &str = "General";
/// Classic link key.
pub const LINK_KEY_SECTION: &str = "LinkKey";
/// LE identity resolving key.
pub const IRK_SECTION: &str = "IdentityResolvingKey";
/// LE local signature key.
pub const CSRK_SECTION: &str = "LocalSignatureKey";
/// LTK when the device is central.
pub const LTK_SECTION: &str = "LongTermKey";
/// LTK when the device is peripheral, older BlueZ naming.
pub const SLAVE_LTK_SECTION: &str = "SlaveLongTermKey";
/// LTK when the device is peripheral.
pub const PERIPHERAL_LTK_SECTION: &str = "PeripheralLongTermKey";

/// Every section an LTK may live in, depending on device role.
pub const LTK_SECTIONS: [&str; 3] = [LTK_SECTION, SLAVE_LTK_SECTION, PERIPHERAL_LTK_SECTION];

/// In-memory copy of one `info` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairingRecord {
    doc: Document,
}

impl PairingRecord {
    /// Parses the text of an `info` file.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self {
            doc: Document::parse(text)?,
        })
    }

    /// Returns true if the record has the named section.
    pub fn has_section(&self, section: &str) -> bool {
        self.doc.has_section(section)
    }

    /// Returns a field, matched exactly.
    pub fn get(&self, section: &str, field: &str) -> Option<&str> {
        self.doc.section(section).and_then(|s| s.get(field))
    }

    /// Sets a field, creating the section if needed.
    pub fn set(&mut self, section: &str, field: &str, value: impl Into<String>) {
        self.doc.section_or_insert(section).set(field, value);
    }

    /// Returns `General.Name`.
    pub fn name(&self) -> Option<&str> {
        self.get(GENERAL_SECTION, "Name")
    }

    /// Returns `General.Alias`, falling back to the name.
    pub fn alias(&self) -> Option<&str> {
        self.get(GENERAL_SECTION, "Alias").or_else(|| self.name())
    }
}

impl From<Document> for PairingRecord {
    fn from(doc: Document) -> Self {
        Self { doc }
    }
}

impl fmt::Display for PairingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.doc, f)
    }
}

/// Access to persisted pairing records.
pub trait PairingStore {
    /// Loads the record for a device, `None` if it was never paired here.
    fn load(&self, adapter: MacAddress, device: MacAddress) -> Result<Option<PairingRecord>>;

    /// Backs up the current record and overwrites it.
    ///
    /// A failure after the backup succeeded leaves the backup in place; no
    /// rollback is attempted.
    fn backup_and_write(
        &mut self,
        adapter: MacAddress,
        device: MacAddress,
        record: &PairingRecord,
    ) -> Result<()>;
}

/// Store rooted at a BlueZ storage directory.
#[derive(Debug, Clone)]
pub struct FsPairingStore {
    base: PathBuf,
}

impl FsPairingStore {
    /// Creates a store rooted at `base`.
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    /// Returns `<base>/<adapter>/<device>`.
    pub fn device_dir(&self, adapter: MacAddress, device: MacAddress) -> PathBuf {
        self.base.join(adapter.to_string()).join(device.to_string())
    }

    /// Returns `<base>/<adapter>/<device>/info`.
    pub fn info_path(&self, adapter: MacAddress, device: MacAddress) -> PathBuf {
        self.device_dir(adapter, device).join(INFO_FILE)
    }

    /// Returns the backup path for a given time.
    pub fn backup_path(&self, adapter: MacAddress, device: MacAddress, at: NaiveDateTime) -> PathBuf {
        self.device_dir(adapter, device)
            .join(format!("{INFO_FILE}-{}", at.format(BACKUP_TIMESTAMP_FORMAT)))
    }

    /// Backs up and overwrites using an explicit timestamp.
    ///
    /// Returns the path of the backup actually created.
    pub fn backup_and_write_at(
        &self,
        adapter: MacAddress,
        device: MacAddress,
        record: &PairingRecord,
        at: NaiveDateTime,
    ) -> Result<PathBuf> {
        let info_path = self.info_path(adapter, device);
        let backup_path = create_backup(&info_path, &self.backup_path(adapter, device, at))?;
        debug!(backup = %backup_path.display(), "Backed up pairing record");

        fs::write(&info_path, record.to_string()).map_err(|e| SyncError::persistence(&info_path, e))?;
        info!(path = %info_path.display(), "Wrote pairing record");

        Ok(backup_path)
    }
}

/// Copies `info_path` to `preferred`, or to the first free `preferred.N`.
fn create_backup(info_path: &Path, preferred: &Path) -> Result<PathBuf> {
    let contents = fs::read(info_path).map_err(|e| SyncError::persistence(info_path, e))?;

    let mut candidate = preferred.to_path_buf();
    let mut suffix = 0u32;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut file) => {
                file.write_all(&contents)
                    .and_then(|()| file.sync_all())
                    .map_err(|e| SyncError::persistence(&candidate, e))?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                suffix += 1;
                let mut name = preferred.as_os_str().to_os_string();
                name.push(format!(".{suffix}"));
                candidate = PathBuf::from(name);
            }
            Err(e) => return Err(SyncError::persistence(&candidate, e)),
        }
    }
}

impl Default for FsPairingStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORAGE_DIR)
    }
}

impl PairingStore for FsPairingStore {
    fn load(&self, adapter: MacAddress, device: MacAddress) -> Result<Option<PairingRecord>> {
        let path = self.info_path(adapter, device);
        if !path.is_file() {
            debug!(path = %path.display(), "No pairing record");
            return Ok(None);
        }

        let text = fs::read_to_string(&path)?;
        PairingRecord::parse(&text)
            .map(Some)
            .map_err(|e| SyncError::MalformedRecord {
                path,
                reason: e.to_string(),
            })
    }

    fn backup_and_write(
        &mut self,
        adapter: MacAddress,
        device: MacAddress,
        record: &PairingRecord,
    ) -> Result<()> {
        self.backup_and_write_at(adapter, device, record, Local::now().naive_local())
            .map(|_| ())
    }
}

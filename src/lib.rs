//! # Bluetooth key sync for dual-boot machines
//!
//! Copies Bluetooth pairing keys that Windows stored in its registry into
//! the pairing records of the Linux Bluetooth stack (BlueZ), so devices
//! paired under Windows keep working under Linux without pairing again.
//!
//! ## Pipeline
//!
//! 1. **Export**: the `BTHPORT\Parameters\Keys` registry key as `.reg` text,
//!    either through `reged` or from a file saved by `regedit`
//!    ([`source`]).
//! 2. **Parse**: the text becomes a [`RegistryDump`] of adapter sections
//!    (classic link keys) and `adapter\device` sections (LE keys)
//!    ([`dump`]).
//! 3. **Decode**: `hex:`, `hex(b):` and `dword:` values are turned into the
//!    forms BlueZ stores ([`codec`]).
//! 4. **Reconcile**: every device is compared field by field with its
//!    `info` file and an [`UpdatePlan`] is built ([`reconcile`]).
//! 5. **Apply**: after approval the old `info` file is backed up and the
//!    new one written ([`store`]).
//!
//! ## Key mapping
//!
//! | Registry | BlueZ `info` |
//! |---|---|
//! | `<adapter>` `<device>=hex:` | `LinkKey.Key` |
//! | `IRK` | `IdentityResolvingKey.Key` |
//! | `CSRK` | `LocalSignatureKey.Key` |
//! | `LTK` | `LongTermKey.Key`, `SlaveLongTermKey.Key`, `PeripheralLongTermKey.Key` |
//! | `KeyLength` | `*LongTermKey.EncSize` |
//! | `EDIV` | `*LongTermKey.EDiv` |
//! | `ERand` | `*LongTermKey.Rand` |
//!
//! ## Example
//!
//! ```no_run
//! use bt_keysync::{FsPairingStore, RegistryDump, Session, UpdatePlan};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let text = bt_keysync::source::read_registry_file("keys.reg")?;
//! let dump = RegistryDump::parse(&text)?;
//!
//! let approve_all = |_: &str, _: &UpdatePlan| true;
//! let mut session = Session::new(FsPairingStore::default(), approve_all, std::io::stdout());
//! let summary = session.run(&dump)?;
//! println!("{} device(s) updated", summary.updated());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod dump;
pub mod error;
pub mod ini;
pub mod mac;
pub mod reconcile;
pub mod session;
pub mod source;
pub mod store;

// Re-export main types for convenience
pub use config::SyncConfig;
pub use dump::{DumpSection, RegistryDump, SectionKey};
pub use error::{Result, SyncError};
pub use mac::MacAddress;
pub use reconcile::{Confirm, DeviceOutcome, FieldChange, Reconciler, UpdatePlan};
pub use session::{Session, Summary};
pub use source::{DumpSource, Reged, RegistryExporter};
pub use store::{FsPairingStore, PairingRecord, PairingStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Field-level reconciliation of registry keys against pairing records.
//!
//! Each device goes through the same states:
//!
//! ```text
//! load ──► NotPaired                       (no info file, report only)
//!   │
//!   ├────► Invalid                         (a registry value failed to decode)
//!   │
//!   └─ plan ──► NoChange                   (every proposed value already stored)
//!        │
//!        └────► PendingApproval ──► Updated   (approved, backed up, written)
//!                                ├► Declined  (not approved, nothing written)
//!                                └► Failed    (approved, write failed)
//! ```
//!
//! Classic devices contribute one `LinkKey.Key` comparison. LE devices
//! contribute one comparison per source field and target section present
//! on both sides. Approval covers the whole plan of a device.

use crate::codec::{decode_dword, decode_hex_blob, decode_reversed_hex_as_decimal};
use crate::dump::{
    DumpSection, CSRK_FIELD, EDIV_FIELD, ERAND_FIELD, IRK_FIELD, KEY_LENGTH_FIELD, LTK_FIELD,
};
use crate::error::{Result, SyncError};
use crate::mac::MacAddress;
use crate::store::{
    PairingRecord, PairingStore, CSRK_SECTION, IRK_SECTION, LINK_KEY_SECTION, LTK_SECTIONS,
};
use std::fmt;
use tracing::{debug, warn};

/// Question passed to [`Confirm::confirm`].
pub const CONFIRM_PROMPT: &str = "Update keys for device?";

/// Field holding the key material in every key section.
const KEY_FIELD: &str = "Key";

/// How one registry field maps onto a record.
struct FieldMapping {
    source: &'static str,
    decode: fn(&str) -> Result<String>,
    sections: &'static [&'static str],
    target: &'static str,
}

const LE_MAPPINGS: [FieldMapping; 6] = [
    FieldMapping {
        source: IRK_FIELD,
        decode: decode_hex_blob,
        sections: &[IRK_SECTION],
        target: KEY_FIELD,
    },
    FieldMapping {
        source: CSRK_FIELD,
        decode: decode_hex_blob,
        sections: &[CSRK_SECTION],
        target: KEY_FIELD,
    },
    FieldMapping {
        source: LTK_FIELD,
        decode: decode_hex_blob,
        sections: &LTK_SECTIONS,
        target: KEY_FIELD,
    },
    FieldMapping {
        source: KEY_LENGTH_FIELD,
        decode: decode_dword,
        sections: &LTK_SECTIONS,
        target: "EncSize",
    },
    FieldMapping {
        source: EDIV_FIELD,
        decode: decode_dword,
        sections: &LTK_SECTIONS,
        target: "EDiv",
    },
    FieldMapping {
        source: ERAND_FIELD,
        decode: decode_reversed_hex_as_decimal,
        sections: &LTK_SECTIONS,
        target: "Rand",
    },
];

/// One proposed value for one record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// Record section.
    pub section: String,
    /// Field within the section.
    pub field: String,
    /// Value stored now, `None` if the field is missing.
    pub current: Option<String>,
    /// Value decoded from the registry.
    pub proposed: String,
}

impl FieldChange {
    fn new(record: &PairingRecord, section: &str, field: &str, proposed: String) -> Self {
        Self {
            section: section.to_string(),
            field: field.to_string(),
            current: record.get(section, field).map(str::to_string),
            proposed,
        }
    }

    /// Returns true if the proposed value differs from the stored one.
    pub fn is_change(&self) -> bool {
        self.current.as_deref() != Some(self.proposed.as_str())
    }

    /// Short name for reports: the section for key fields, the indented
    /// field name for LTK parameters.
    pub fn label(&self) -> String {
        if self.field == KEY_FIELD {
            self.section.clone()
        } else {
            format!("  {}", self.field)
        }
    }
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.as_deref().unwrap_or("(none)");
        if self.is_change() {
            write!(f, "{}: {} > {}", self.label(), current, self.proposed)
        } else {
            write!(f, "{}: {} > No change required.", self.label(), current)
        }
    }
}

/// Every comparison made for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    /// Local controller.
    pub adapter: MacAddress,
    /// Remote peer.
    pub device: MacAddress,
    /// Comparisons in evaluation order, unchanged ones included.
    pub changes: Vec<FieldChange>,
}

impl UpdatePlan {
    /// Creates an empty plan.
    pub fn new(adapter: MacAddress, device: MacAddress) -> Self {
        Self {
            adapter,
            device,
            changes: Vec::new(),
        }
    }

    /// Returns true if any comparison found a difference.
    pub fn requires_update(&self) -> bool {
        self.changes.iter().any(FieldChange::is_change)
    }

    /// Iterates only the comparisons that differ.
    pub fn differences(&self) -> impl Iterator<Item = &FieldChange> {
        self.changes.iter().filter(|c| c.is_change())
    }

    /// Writes every proposed value into the record.
    pub fn apply(&self, record: &mut PairingRecord) {
        for change in &self.changes {
            record.set(&change.section, &change.field, change.proposed.as_str());
        }
    }
}

/// Builds the plan for a classic device from its raw `hex:` link key.
///
/// A record without a `LinkKey` section yields an empty plan.
///
/// # Errors
///
/// Returns `SyncError::MalformedValue` if the key does not decode, whether
/// or not the record has a `LinkKey` section.
pub fn plan_link_key(
    adapter: MacAddress,
    device: MacAddress,
    record: &PairingRecord,
    raw_key: &str,
) -> Result<UpdatePlan> {
    let key = decode_hex_blob(raw_key)?;
    let mut plan = UpdatePlan::new(adapter, device);
    if record.has_section(LINK_KEY_SECTION) {
        plan.changes
            .push(FieldChange::new(record, LINK_KEY_SECTION, KEY_FIELD, key));
    }
    Ok(plan)
}

/// Builds the plan for an LE device from its `adapter\device` section.
///
/// A source field is decoded only when at least one of its target
/// sections exists in the record.
///
/// # Errors
///
/// Returns `SyncError::MalformedValue` for the first field that does not
/// decode.
pub fn plan_le_keys(
    adapter: MacAddress,
    device: MacAddress,
    record: &PairingRecord,
    section: &DumpSection,
) -> Result<UpdatePlan> {
    let mut plan = UpdatePlan::new(adapter, device);
    for mapping in &LE_MAPPINGS {
        let Some(raw) = section.field(mapping.source) else {
            continue;
        };
        let targets: Vec<&str> = mapping
            .sections
            .iter()
            .copied()
            .filter(|s| record.has_section(s))
            .collect();
        if targets.is_empty() {
            debug!(field = mapping.source, "No target section in record");
            continue;
        }

        let value = (mapping.decode)(raw)?;
        for target in targets {
            plan.changes
                .push(FieldChange::new(record, target, mapping.target, value.clone()));
        }
    }
    Ok(plan)
}

/// Where the new keys of a device come from.
#[derive(Debug, Clone, Copy)]
pub enum KeySource<'a> {
    /// Raw `hex:` link key from an adapter section.
    LinkKey(&'a str),
    /// An `adapter\device` section with LE keys.
    LeKeys(&'a DumpSection),
}

/// Result of loading and planning one device, before any decision.
#[derive(Debug)]
pub enum Prepared {
    /// No pairing record on this system.
    NotPaired,
    /// A registry value could not be decoded.
    Invalid {
        /// Record as loaded.
        record: PairingRecord,
        /// Decode error.
        error: SyncError,
    },
    /// Plan ready for review.
    Ready {
        /// Record as loaded.
        record: PairingRecord,
        /// Proposed changes.
        plan: UpdatePlan,
    },
}

/// Terminal state of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOutcome {
    /// No pairing record on this system.
    NotPaired,
    /// Stored values already match.
    NoChange,
    /// Approved and written.
    Updated,
    /// Not approved; nothing written.
    Declined,
    /// Skipped because of a malformed registry value or record.
    Invalid(String),
    /// Approved but the backup or write failed.
    Failed(String),
}

/// Decision on whether to apply a plan.
pub trait Confirm {
    /// Returns true to apply `plan`.
    fn confirm(&mut self, prompt: &str, plan: &UpdatePlan) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&str, &UpdatePlan) -> bool,
{
    fn confirm(&mut self, prompt: &str, plan: &UpdatePlan) -> bool {
        self(prompt, plan)
    }
}

/// Drives devices from plan to outcome against a store.
#[derive(Debug)]
pub struct Reconciler<S> {
    store: S,
}

impl<S: PairingStore> Reconciler<S> {
    /// Creates a reconciler over a store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consumes the reconciler, returning the store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Loads the record of a device and plans its changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read or parsed.
    pub fn prepare(
        &self,
        adapter: MacAddress,
        device: MacAddress,
        source: KeySource<'_>,
    ) -> Result<Prepared> {
        let Some(record) = self.store.load(adapter, device)? else {
            return Ok(Prepared::NotPaired);
        };

        let planned = match source {
            KeySource::LinkKey(raw) => plan_link_key(adapter, device, &record, raw),
            KeySource::LeKeys(section) => plan_le_keys(adapter, device, &record, section),
        };
        Ok(match planned {
            Ok(plan) => Prepared::Ready { record, plan },
            Err(error) => Prepared::Invalid { record, error },
        })
    }

    /// Takes a prepared device to its terminal state, asking `confirm` only
    /// when something differs.
    pub fn finish<C: Confirm + ?Sized>(&mut self, prepared: Prepared, confirm: &mut C) -> DeviceOutcome {
        let (mut record, plan) = match prepared {
            Prepared::NotPaired => return DeviceOutcome::NotPaired,
            Prepared::Invalid { error, .. } => return DeviceOutcome::Invalid(error.to_string()),
            Prepared::Ready { record, plan } => (record, plan),
        };

        if !plan.requires_update() {
            return DeviceOutcome::NoChange;
        }
        if !confirm.confirm(CONFIRM_PROMPT, &plan) {
            debug!(device = %plan.device, "Update declined");
            return DeviceOutcome::Declined;
        }

        plan.apply(&mut record);
        match self.store.backup_and_write(plan.adapter, plan.device, &record) {
            Ok(()) => DeviceOutcome::Updated,
            Err(e) => {
                warn!(device = %plan.device, error = %e, "Failed to persist pairing record");
                DeviceOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::RegistryDump;

    fn macs() -> (MacAddress, MacAddress) {
        (
            MacAddress::from_compact("aabbccddeeff").unwrap(),
            MacAddress::from_compact("112233445566").unwrap(),
        )
    }

    fn le_section(body: &str) -> RegistryDump {
        RegistryDump::parse(&format!("banner\n\n[root]\n\n[aabbccddeeff\\112233445566]\n{body}")).unwrap()
    }

    #[test]
    fn test_link_key_change() {
        let (adapter, device) = macs();
        let record = PairingRecord::parse("[LinkKey]\nKey=112233\n").unwrap();
        let plan = plan_link_key(adapter, device, &record, "hex:aa,bb,cc").unwrap();
        assert!(plan.requires_update());
        assert_eq!(plan.changes[0].to_string(), "LinkKey: 112233 > AABBCC");
    }

    #[test]
    fn test_link_key_no_change() {
        let (adapter, device) = macs();
        let record = PairingRecord::parse("[LinkKey]\nKey=AABBCC\n").unwrap();
        let plan = plan_link_key(adapter, device, &record, "hex:aa,bb,cc").unwrap();
        assert!(!plan.requires_update());
        assert_eq!(plan.changes[0].to_string(), "LinkKey: AABBCC > No change required.");
    }

    #[test]
    fn test_link_key_without_section() {
        let (adapter, device) = macs();
        let record = PairingRecord::parse("[General]\nName=x\n").unwrap();
        let plan = plan_link_key(adapter, device, &record, "hex:01,02").unwrap();
        assert!(plan.changes.is_empty());
    }

    #[test]
    fn test_malformed_link_key_without_section() {
        let (adapter, device) = macs();
        let record = PairingRecord::parse("[LongTermKey]\nKey=00\n").unwrap();
        let err = plan_link_key(adapter, device, &record, "hex:zz").unwrap_err();
        assert!(matches!(err, SyncError::MalformedValue { .. }));
    }

    #[test]
    fn test_le_keys_only_present_sections() {
        let (adapter, device) = macs();
        let dump = le_section(
            "LTK=hex:01,02\nKeyLength=dword:00000010\nEDIV=dword:00001234\nERand=hex(b):01,00,00,00,00,00,00,00\nIRK=hex:09\n",
        );
        let section = dump.get("aabbccddeeff\\112233445566").unwrap();
        let record = PairingRecord::parse(
            "[LongTermKey]\nKey=0102\nAuthenticated=0\nEncSize=16\nEDiv=0\nRand=0\n",
        )
        .unwrap();

        let plan = plan_le_keys(adapter, device, &record, section).unwrap();
        let touched: Vec<(&str, &str)> = plan
            .changes
            .iter()
            .map(|c| (c.section.as_str(), c.field.as_str()))
            .collect();
        assert_eq!(
            touched,
            vec![
                ("LongTermKey", "Key"),
                ("LongTermKey", "EncSize"),
                ("LongTermKey", "EDiv"),
                ("LongTermKey", "Rand"),
            ]
        );
        let diffs: Vec<_> = plan.differences().map(|c| c.field.as_str()).collect();
        assert_eq!(diffs, vec!["EDiv", "Rand"]);
        assert_eq!(plan.changes[2].proposed, "4660");
        assert_eq!(plan.changes[3].proposed, "1");
    }

    #[test]
    fn test_le_keys_missing_field_counts_as_change() {
        let (adapter, device) = macs();
        let dump = le_section("CSRK=hex:0a,0b\n");
        let section = dump.get("aabbccddeeff\\112233445566").unwrap();
        let record = PairingRecord::parse("[LocalSignatureKey]\nCounter=0\n").unwrap();
        let plan = plan_le_keys(adapter, device, &record, section).unwrap();
        assert!(plan.requires_update());
        assert_eq!(plan.changes[0].current, None);
    }

    #[test]
    fn test_le_keys_malformed_value() {
        let (adapter, device) = macs();
        let dump = le_section("EDIV=dword:xyz\n");
        let section = dump.get("aabbccddeeff\\112233445566").unwrap();
        let record = PairingRecord::parse("[SlaveLongTermKey]\nEDiv=1\n").unwrap();
        let err = plan_le_keys(adapter, device, &record, section).unwrap_err();
        assert!(matches!(err, SyncError::MalformedValue { .. }));
    }

    #[test]
    fn test_apply_writes_all_fields() {
        let (adapter, device) = macs();
        let mut record = PairingRecord::parse("[LinkKey]\nKey=112233\nType=4\n").unwrap();
        let plan = plan_link_key(adapter, device, &record, "hex:aa,bb,cc").unwrap();
        plan.apply(&mut record);
        assert_eq!(record.to_string(), "[LinkKey]\nKey=AABBCC\nType=4\n");
    }

    #[test]
    fn test_closure_confirm() {
        let (adapter, device) = macs();
        let plan = UpdatePlan::new(adapter, device);
        let mut asked = Vec::new();
        let mut confirm = |prompt: &str, _: &UpdatePlan| {
            asked.push(prompt.to_string());
            true
        };
        assert!(Confirm::confirm(&mut confirm, CONFIRM_PROMPT, &plan));
        assert_eq!(asked, vec![CONFIRM_PROMPT.to_string()]);
    }
}

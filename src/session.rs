//! Run a parsed dump through the reconciler with an operator report.
//!
//! Sections are visited in the dump's sorted order. Each one is reported
//! under a `Bluetooth Adapter - XX:...` heading, printed whenever the
//! adapter differs from the previous section's. The report looks like:
//!
//! ```text
//! Bluetooth Adapter - AA:BB:CC:DD:EE:FF
//!
//!   11:22:33:44:55:66 (Keyboard K380 / Keyboard K380)
//!     | LinkKey: 112233 > AABBCC
//!     > OK!
//!   22:33:44:55:66:77 (# not paired #)
//! ```

use crate::dump::{DumpSection, RegistryDump, SectionKey};
use crate::error::Result;
use crate::mac::MacAddress;
use crate::reconcile::{
    Confirm, DeviceOutcome, FieldChange, KeySource, Prepared, Reconciler,
};
use crate::store::PairingStore;
use std::io::Write;
use tracing::{debug, instrument, warn};

/// Tracks the last adapter heading printed.
///
/// Threaded through the session loop by value; it only affects output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterGrouping {
    previous: Option<MacAddress>,
}

impl AdapterGrouping {
    /// Prints a heading if `adapter` starts a new group.
    pub fn enter<W: Write + ?Sized>(self, adapter: MacAddress, out: &mut W) -> Result<Self> {
        if self.previous != Some(adapter) {
            if self.previous.is_some() {
                writeln!(out)?;
            }
            writeln!(out, "Bluetooth Adapter - {adapter}")?;
        }
        Ok(Self {
            previous: Some(adapter),
        })
    }

    /// Returns the adapter of the current group.
    pub fn current(&self) -> Option<MacAddress> {
        self.previous
    }
}

/// What happened to one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    /// Local controller.
    pub adapter: MacAddress,
    /// Remote peer, as written in the dump if it is not an address.
    pub device: String,
    /// Every comparison shown to the operator.
    pub changes: Vec<FieldChange>,
    /// Terminal state.
    pub outcome: DeviceOutcome,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// One report per device, in processing order.
    pub devices: Vec<DeviceReport>,
}

impl Summary {
    /// Counts devices with the given outcome.
    pub fn count(&self, outcome: &DeviceOutcome) -> usize {
        self.devices.iter().filter(|d| &d.outcome == outcome).count()
    }

    /// Counts devices that were written.
    pub fn updated(&self) -> usize {
        self.count(&DeviceOutcome::Updated)
    }

    /// Counts devices that were skipped because of an error.
    pub fn errors(&self) -> usize {
        self.devices
            .iter()
            .filter(|d| matches!(d.outcome, DeviceOutcome::Invalid(_) | DeviceOutcome::Failed(_)))
            .count()
    }
}

/// One reconciliation run.
pub struct Session<S, C, W> {
    reconciler: Reconciler<S>,
    confirm: C,
    out: W,
}

impl<S, C, W> Session<S, C, W>
where
    S: PairingStore,
    C: Confirm,
    W: Write,
{
    /// Creates a session writing its report to `out`.
    pub fn new(store: S, confirm: C, out: W) -> Self {
        Self {
            reconciler: Reconciler::new(store),
            confirm,
            out,
        }
    }

    /// Consumes the session, returning the store and report sink.
    pub fn into_parts(self) -> (S, W) {
        (self.reconciler.into_store(), self.out)
    }

    /// Processes every device in the dump.
    ///
    /// # Errors
    ///
    /// Only failures to write the report are returned; device-level
    /// problems end up in the summary.
    #[instrument(skip_all, fields(sections = dump.len()))]
    pub fn run(&mut self, dump: &RegistryDump) -> Result<Summary> {
        let mut summary = Summary::default();
        let mut grouping = AdapterGrouping::default();

        for section in dump.sections() {
            let adapter = section.key().adapter();
            grouping = grouping.enter(adapter, &mut self.out)?;

            match section.key() {
                SectionKey::Adapter(_) => self.run_adapter(section, adapter, &mut summary)?,
                SectionKey::Device { device, .. } => {
                    let report = self.run_device(adapter, device, KeySource::LeKeys(section))?;
                    summary.devices.push(report);
                }
            }
        }

        debug!(
            devices = summary.devices.len(),
            updated = summary.updated(),
            "Session finished"
        );
        Ok(summary)
    }

    fn run_adapter(
        &mut self,
        section: &DumpSection,
        adapter: MacAddress,
        summary: &mut Summary,
    ) -> Result<()> {
        for (name, raw_key) in section.link_keys() {
            let device = match MacAddress::from_compact(name) {
                Ok(device) => device,
                Err(e) => {
                    warn!(adapter = %adapter, field = name, "Skipping non-address field");
                    writeln!(self.out, "  {name} (# {e} #)")?;
                    summary.devices.push(DeviceReport {
                        adapter,
                        device: name.to_string(),
                        changes: Vec::new(),
                        outcome: DeviceOutcome::Invalid(e.to_string()),
                    });
                    continue;
                }
            };
            let report = self.run_device(adapter, device, KeySource::LinkKey(raw_key))?;
            summary.devices.push(report);
        }
        Ok(())
    }

    fn run_device(
        &mut self,
        adapter: MacAddress,
        device: MacAddress,
        source: KeySource<'_>,
    ) -> Result<DeviceReport> {
        let mut report = DeviceReport {
            adapter,
            device: device.to_string(),
            changes: Vec::new(),
            outcome: DeviceOutcome::NotPaired,
        };

        let prepared = match self.reconciler.prepare(adapter, device, source) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(device = %device, error = %e, "Cannot read pairing record");
                writeln!(self.out, "  {device} (# unreadable: {e} #)")?;
                report.outcome = DeviceOutcome::Invalid(e.to_string());
                return Ok(report);
            }
        };

        match &prepared {
            Prepared::NotPaired => {
                writeln!(self.out, "  {device} (# not paired #)")?;
            }
            Prepared::Invalid { record, error } => {
                self.write_device_heading(device, record.name(), record.alias())?;
                warn!(device = %device, error = %error, "Skipping device");
                writeln!(self.out, "    ! {error}")?;
            }
            Prepared::Ready { record, plan } => {
                self.write_device_heading(device, record.name(), record.alias())?;
                for change in &plan.changes {
                    writeln!(self.out, "    | {change}")?;
                }
                report.changes = plan.changes.clone();
            }
        }

        report.outcome = self.reconciler.finish(prepared, &mut self.confirm);
        match &report.outcome {
            DeviceOutcome::Updated => writeln!(self.out, "    > OK!")?,
            DeviceOutcome::Declined => writeln!(self.out, "    > Skipped.")?,
            DeviceOutcome::Failed(e) => writeln!(self.out, "    ! Failed to write: {e}")?,
            DeviceOutcome::NotPaired | DeviceOutcome::NoChange | DeviceOutcome::Invalid(_) => {}
        }
        self.out.flush()?;
        Ok(report)
    }

    fn write_device_heading(
        &mut self,
        device: MacAddress,
        name: Option<&str>,
        alias: Option<&str>,
    ) -> Result<()> {
        let name = name.unwrap_or("unknown");
        let alias = alias.unwrap_or(name);
        writeln!(self.out)?;
        writeln!(self.out, "  {device} ({name} / {alias})")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouping_prints_on_change_only() {
        let a = MacAddress::from_compact("aaaaaaaaaaaa").unwrap();
        let b = MacAddress::from_compact("bbbbbbbbbbbb").unwrap();
        let mut out = Vec::new();

        let grouping = AdapterGrouping::default();
        let grouping = grouping.enter(a, &mut out).unwrap();
        let grouping = grouping.enter(a, &mut out).unwrap();
        let grouping = grouping.enter(b, &mut out).unwrap();

        assert_eq!(grouping.current(), Some(b));
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Bluetooth Adapter - AA:AA:AA:AA:AA:AA\n\nBluetooth Adapter - BB:BB:BB:BB:BB:BB\n"
        );
    }

    #[test]
    fn test_summary_counts() {
        let adapter = MacAddress::from_compact("aaaaaaaaaaaa").unwrap();
        let report = |outcome| DeviceReport {
            adapter,
            device: "x".into(),
            changes: Vec::new(),
            outcome,
        };
        let summary = Summary {
            devices: vec![
                report(DeviceOutcome::Updated),
                report(DeviceOutcome::NotPaired),
                report(DeviceOutcome::Failed("disk".into())),
                report(DeviceOutcome::Invalid("hex".into())),
            ],
        };
        assert_eq!(summary.updated(), 1);
        assert_eq!(summary.count(&DeviceOutcome::NotPaired), 1);
        assert_eq!(summary.errors(), 2);
    }
}

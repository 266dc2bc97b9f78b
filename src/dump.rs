//! Registry export parsing.
//!
//! An export of `...\Services\BTHPORT\Parameters\Keys` looks like this:
//!
//! ```text
//! Windows Registry Editor Version 5.00
//!
//! [HKEY_LOCAL_MACHINE\SYSTEM\ControlSet001\Services\BTHPORT\Parameters\Keys]
//!
//! [HKEY_LOCAL_MACHINE\SYSTEM\ControlSet001\Services\BTHPORT\Parameters\Keys\5cf370aabbcc]
//! "MasterIRK"=hex:...
//! "0c8b95112233"=hex:0f,1e,2d,3c,...
//!
//! [HKEY_LOCAL_MACHINE\SYSTEM\ControlSet001\Services\BTHPORT\Parameters\Keys\5cf370aabbcc\d1e2f3a4b5c6]
//! "LTK"=hex:...
//! "KeyLength"=dword:00000010
//! "ERand"=hex(b):...
//! "EDIV"=dword:0000a1b2
//! ```
//!
//! Adapter sections map classic device addresses to link keys. Device
//! sections hold the LE keys of one device.

use crate::error::{Result, SyncError};
use crate::ini::{Document, Section};
use crate::mac::MacAddress;
use std::fmt;
use tracing::{debug, instrument};

/// Start of every key path in the export.
const KEY_PATH_START: &str = "HKEY_LOCAL_MACHINE\\SYSTEM\\";

/// End of the common key path, after the control set name.
const KEY_PATH_END: &str = "\\Services\\BTHPORT\\Parameters\\Keys\\";

/// Banner, blank line, root `Keys` header, blank line.
const HEADER_LINES: usize = 4;

/// Adapter-level field that is not a device link key.
pub const MASTER_IRK_FIELD: &str = "masterirk";

/// LE identity resolving key.
pub const IRK_FIELD: &str = "IRK";
/// LE connection signature resolving key.
pub const CSRK_FIELD: &str = "CSRK";
/// LE long term key.
pub const LTK_FIELD: &str = "LTK";
/// LTK encryption size in bytes.
pub const KEY_LENGTH_FIELD: &str = "KeyLength";
/// LTK encrypted diversifier.
pub const EDIV_FIELD: &str = "EDIV";
/// LTK random number.
pub const ERAND_FIELD: &str = "ERand";

/// Identity of a dump section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKey {
    /// `adapter`: classic link keys of every device paired with it.
    Adapter(MacAddress),
    /// `adapter\device`: LE keys of one device.
    Device {
        /// Local controller.
        adapter: MacAddress,
        /// Remote peer.
        device: MacAddress,
    },
}

impl SectionKey {
    /// Parses a section name left after the key path prefix is stripped.
    ///
    /// # Errors
    ///
    /// Returns an error for more than one `\` or a part that is not a
    /// 12-digit address.
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split('\\').collect();
        match parts.as_slice() {
            [adapter] => Ok(Self::Adapter(MacAddress::from_compact(adapter)?)),
            [adapter, device] => Ok(Self::Device {
                adapter: MacAddress::from_compact(adapter)?,
                device: MacAddress::from_compact(device)?,
            }),
            _ => Err(SyncError::InvalidMacAddress(name.to_string())),
        }
    }

    /// Returns the adapter this section belongs to.
    pub fn adapter(&self) -> MacAddress {
        match self {
            Self::Adapter(adapter) | Self::Device { adapter, .. } => *adapter,
        }
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adapter(adapter) => write!(f, "{}", adapter.to_compact()),
            Self::Device { adapter, device } => {
                write!(f, "{}\\{}", adapter.to_compact(), device.to_compact())
            }
        }
    }
}

/// One parsed section: its raw name, identity and raw fields.
#[derive(Debug, Clone)]
pub struct DumpSection {
    raw_key: String,
    key: SectionKey,
    fields: Section,
}

impl DumpSection {
    /// Returns the section name as it appeared in the export.
    pub fn raw_key(&self) -> &str {
        &self.raw_key
    }

    /// Returns the parsed identity.
    pub fn key(&self) -> SectionKey {
        self.key
    }

    /// Looks up a raw field value, ignoring case like the registry does.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get_ignore_case(name)
    }

    /// Iterates `(device name, raw link key)` pairs of an adapter section,
    /// skipping `masterirk`. Device sections yield nothing.
    pub fn link_keys(&self) -> impl Iterator<Item = (&str, &str)> {
        let is_adapter = matches!(self.key, SectionKey::Adapter(_));
        self.fields
            .entries()
            .filter(move |(name, _)| is_adapter && !name.eq_ignore_ascii_case(MASTER_IRK_FIELD))
    }
}

/// Parsed registry export, sections ordered by raw name.
#[derive(Debug, Clone, Default)]
pub struct RegistryDump {
    sections: Vec<DumpSection>,
}

impl RegistryDump {
    /// Parses raw export text.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::MalformedDump` if the text cannot be split into
    /// sections or a section name is not an address pair.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bt_keysync::RegistryDump;
    ///
    /// let text = "Windows Registry Editor Version 5.00\r\n\r\n\
    ///     [HKEY_LOCAL_MACHINE\\SYSTEM\\ControlSet001\\Services\\BTHPORT\\Parameters\\Keys]\r\n\r\n\
    ///     [HKEY_LOCAL_MACHINE\\SYSTEM\\ControlSet001\\Services\\BTHPORT\\Parameters\\Keys\\aabbccddeeff]\r\n\
    ///     \"112233445566\"=hex:01,02\r\n";
    /// let dump = RegistryDump::parse(text).unwrap();
    /// assert_eq!(dump.len(), 1);
    /// ```
    #[instrument(skip(raw), fields(bytes = raw.len()))]
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = normalize(raw);
        let lines: Vec<(usize, String)> = join_continuations(
            normalized
                .split('\n')
                .enumerate()
                .skip(HEADER_LINES)
                .map(|(i, line)| (i + 1, line)),
        );
        debug!(lines = lines.len(), "Normalized export");

        let doc = Document::parse_lines(lines.iter().map(|(n, line)| (*n, line.as_str())))?;

        let mut sections = Vec::with_capacity(doc.len());
        for fields in doc.sections() {
            let raw_key = fields.name().to_string();
            let key = SectionKey::parse(&raw_key).map_err(|e| {
                let line = header_line(&lines, &raw_key);
                SyncError::malformed_dump(line, e.to_string())
            })?;
            sections.push(DumpSection {
                raw_key,
                key,
                fields: fields.clone(),
            });
        }
        sections.sort_by(|a, b| a.raw_key.cmp(&b.raw_key));

        debug!(sections = sections.len(), "Parsed registry dump");
        Ok(Self { sections })
    }

    /// Returns a section by raw name.
    pub fn get(&self, raw_key: &str) -> Option<&DumpSection> {
        self.sections.iter().find(|s| s.raw_key == raw_key)
    }

    /// Iterates sections in lexicographic order of raw name.
    pub fn sections(&self) -> impl Iterator<Item = &DumpSection> {
        self.sections.iter()
    }

    /// Returns the number of sections.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Returns true if the export held no adapter or device sections.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Applies the text-level rewrites: quotes dropped, `=` spaced, key path
/// prefix stripped, line endings normalized.
pub fn normalize(raw: &str) -> String {
    let text = raw.replace('"', "").replace('=', " = ");
    let text = text.replace("\r\n", "\n");
    text.split('\n')
        .map(strip_key_path)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Removes every `HKEY_LOCAL_MACHINE\SYSTEM\<set>\Services\BTHPORT\Parameters\Keys\`
/// from a line, `<set>` matched as short as possible.
fn strip_key_path(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find(KEY_PATH_START) {
        let after_start = &rest[start + KEY_PATH_START.len()..];
        match after_start.find(KEY_PATH_END) {
            // The control set name must be non-empty.
            Some(end) if end > 0 => {
                out.push_str(&rest[..start]);
                rest = &after_start[end + KEY_PATH_END.len()..];
            }
            _ => break,
        }
    }
    out.push_str(rest);
    out
}

/// Joins `regedit` continuation lines (`...,\` then an indented line) and
/// keeps the number of the first physical line.
fn join_continuations<'a, I>(lines: I) -> Vec<(usize, String)>
where
    I: IntoIterator<Item = (usize, &'a str)>,
{
    let mut joined: Vec<(usize, String)> = Vec::new();
    let mut continuing = false;
    for (number, line) in lines {
        let piece = if continuing { line.trim_start() } else { line };
        let (piece, continues) = match piece.trim_end().strip_suffix('\\') {
            Some(head) => (head, true),
            None => (piece, false),
        };
        if let (true, Some((_, last))) = (continuing, joined.last_mut()) {
            last.push_str(piece);
        } else {
            joined.push((number, piece.to_string()));
        }
        continuing = continues;
    }
    joined
}

fn header_line(lines: &[(usize, String)], name: &str) -> usize {
    let header = format!("[{name}]");
    lines
        .iter()
        .find(|(_, line)| line.trim() == header)
        .map(|(n, _)| *n)
        .unwrap_or(0)
}

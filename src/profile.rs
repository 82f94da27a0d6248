//! Per-revision patch configuration.
//!
//! Nothing here is global: a [`PatchProfile`] is built (or loaded) once per
//! run and handed to the coordinator.

use serde::{Deserialize, Serialize};
use std::num::ParseIntError;
use std::ops::Range;

use crate::crc::COVERAGE_START;

/// Offset of the little-endian checksum field, `0x18C..=0x18F`.
pub const CHECKSUM_FIELD: usize = 0x18C;

/// Battery bytes are volts times this, truncated.
pub const VOLTS_TO_RAW: f64 = 50.0;

/// Where the checksum lives and which bytes it covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumLayout {
    #[serde(with = "offset_repr")]
    pub field_offset: usize,
    #[serde(with = "offset_repr")]
    pub coverage_start: usize,
}

impl ChecksumLayout {
    /// Byte range of the checksum field. `None` unless the whole field sits
    /// in the header, in front of `coverage_start`.
    pub fn field_range(&self) -> Option<Range<usize>> {
        let end = self.field_offset.checked_add(4)?;
        (end <= self.coverage_start).then(|| self.field_offset..end)
    }
}

impl Default for ChecksumLayout {
    fn default() -> Self {
        Self {
            field_offset: CHECKSUM_FIELD,
            coverage_start: COVERAGE_START,
        }
    }
}

/// A byte value pinned to an absolute offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteAt {
    #[serde(with = "offset_repr")]
    pub offset: usize,
    pub value: u8,
}

impl ByteAt {
    pub const fn new(offset: usize, value: u8) -> Self {
        Self { offset, value }
    }
}

/// One battery level: where it lives, what a stock image holds there, and
/// what we want instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub label: String,
    #[serde(with = "offset_repr")]
    pub offset: usize,
    pub stock: u8,
    pub value: u8,
}

/// The battery calibration table. Stock values and replacement values come
/// from the same entries, so the two can't drift apart.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationTable {
    pub entries: Vec<CalibrationEntry>,
}

impl CalibrationTable {
    pub fn new(entries: Vec<CalibrationEntry>) -> Self {
        Self { entries }
    }

    pub fn stock_values(&self) -> Vec<ByteAt> {
        self.entries.iter().map(|e| ByteAt::new(e.offset, e.stock)).collect()
    }

    pub fn patch_set(&self) -> Vec<ByteAt> {
        self.entries.iter().map(|e| ByteAt::new(e.offset, e.value)).collect()
    }

    /// Replaces the value of the entry labelled `label`. Returns false if
    /// there's no such entry.
    pub fn set_value(&mut self, label: &str, value: u8) -> bool {
        match self.entries.iter_mut().find(|e| e.label == label) {
            Some(entry) => {
                entry.value = value;
                true
            }
            None => false,
        }
    }
}

/// Everything the coordinator needs to patch one firmware revision.
///
/// `stock_values` and `patch_set` usually cover the same offsets (see
/// [`PatchProfile::from_calibration`]) but nothing requires it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchProfile {
    pub revision: String,
    #[serde(default)]
    pub layout: ChecksumLayout,
    pub stock_values: Vec<ByteAt>,
    pub patch_set: Vec<ByteAt>,
}

impl PatchProfile {
    pub fn from_calibration(revision: impl Into<String>, table: &CalibrationTable) -> Self {
        Self {
            revision: revision.into(),
            layout: ChecksumLayout::default(),
            stock_values: table.stock_values(),
            patch_set: table.patch_set(),
        }
    }

    /// Adds `entry` to the patch set, replacing any entry already at that
    /// offset.
    pub fn override_patch(&mut self, entry: ByteAt) {
        match self.patch_set.iter_mut().find(|p| p.offset == entry.offset) {
            Some(existing) => existing.value = entry.value,
            None => self.patch_set.push(entry),
        }
    }

    /// First offset that appears twice in either set, if any.
    pub fn duplicate_offset(&self) -> Option<usize> {
        first_duplicate(&self.stock_values).or_else(|| first_duplicate(&self.patch_set))
    }
}

fn first_duplicate(set: &[ByteAt]) -> Option<usize> {
    let mut seen = std::collections::BTreeSet::new();
    set.iter().map(|b| b.offset).find(|&offset| !seen.insert(offset))
}

/// Converts a battery voltage to the byte the firmware compares against.
/// Returns `None` if the result doesn't fit in a byte.
pub fn voltage_to_byte(volts: f64) -> Option<u8> {
    let raw = (volts * VOLTS_TO_RAW).trunc();
    if raw.is_finite() && (0.0..=255.0).contains(&raw) {
        Some(raw as u8)
    } else {
        None
    }
}

/// Parses `0x`-prefixed hex or plain decimal.
pub fn parse_offset(text: &str) -> Result<usize, ParseIntError> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => text.parse(),
    }
}

/// Offsets serialize as hex strings and deserialize from either hex strings
/// or plain integers. Use with `#[serde(with = "offset_repr")]`.
pub mod offset_repr {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(usize),
        Text(String),
    }

    pub fn serialize<S: Serializer>(offset: &usize, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{:#x}", offset))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<usize, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(t) => super::parse_offset(&t)
                .map_err(|e| D::Error::custom(format!("bad offset {:?}: {}", t, e))),
        }
    }
}

///////////////////////////////////////////////////////////////////////////
// Built-in revisions.

cfg_if::cfg_if! {
    if #[cfg(feature = "rev-08-03")] {
        pub const REV_08_03: &str = "08.03";

        /// Battery levels for firmware 08.03: label, offset, stock byte,
        /// default byte. The defaults are 4.00, 3.92, 3.82, 3.72 and 3.66 V
        /// run through [`voltage_to_byte`].
        const LEVELS_08_03: [(&str, usize, u8, u8); 5] = [
            ("5 bars", 0x3564EC, 0xBF, 200),
            ("4 bars", 0x3564F4, 0xB7, 196),
            ("3 bars", 0x35658C, 0xAF, 191),
            ("2 bars", 0x356594, 0xA9, 186),
            ("1 bar (red)", 0x3565B0, 0xA1, 183),
        ];

        /// The 08.03 calibration table with its default voltages applied.
        pub fn calibration_08_03() -> CalibrationTable {
            let entries = LEVELS_08_03
                .iter()
                .map(|&(label, offset, stock, value)| CalibrationEntry {
                    label: label.to_string(),
                    offset,
                    stock,
                    value,
                })
                .collect();
            CalibrationTable::new(entries)
        }

        /// Looks up a calibration table compiled into this build.
        pub fn builtin_calibration(revision: &str) -> Option<CalibrationTable> {
            match revision {
                REV_08_03 => Some(calibration_08_03()),
                _ => None,
            }
        }

        pub fn builtin_revisions() -> &'static [&'static str] {
            &[REV_08_03]
        }
    } else {
        pub fn builtin_calibration(_revision: &str) -> Option<CalibrationTable> {
            None
        }

        pub fn builtin_revisions() -> &'static [&'static str] {
            &[]
        }
    }
}

/// Looks up a profile compiled into this build.
pub fn builtin(revision: &str) -> Option<PatchProfile> {
    builtin_calibration(revision).map(|table| PatchProfile::from_calibration(revision, &table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voltages_truncate() {
        assert_eq!(voltage_to_byte(4.0), Some(200));
        assert_eq!(voltage_to_byte(3.92), Some(196));
        assert_eq!(voltage_to_byte(3.66), Some(183));
        assert_eq!(voltage_to_byte(3.999), Some(199));
        assert_eq!(voltage_to_byte(0.0), Some(0));
    }

    #[test]
    fn voltages_out_of_range() {
        assert_eq!(voltage_to_byte(5.2), None);
        assert_eq!(voltage_to_byte(-0.1), None);
        assert_eq!(voltage_to_byte(f64::NAN), None);
        assert_eq!(voltage_to_byte(f64::INFINITY), None);
    }

    #[test]
    fn offsets_parse_hex_and_decimal() {
        assert_eq!(parse_offset("0x3564ec"), Ok(0x3564EC));
        assert_eq!(parse_offset("0X18C"), Ok(0x18C));
        assert_eq!(parse_offset(" 512 "), Ok(512));
        assert!(parse_offset("0xzz").is_err());
        assert!(parse_offset("").is_err());
    }

    #[test]
    fn table_keeps_sets_in_step() {
        let table = CalibrationTable::new(vec![
            CalibrationEntry { label: "a".into(), offset: 10, stock: 1, value: 2 },
            CalibrationEntry { label: "b".into(), offset: 20, stock: 3, value: 4 },
        ]);
        assert_eq!(table.stock_values(), vec![ByteAt::new(10, 1), ByteAt::new(20, 3)]);
        assert_eq!(table.patch_set(), vec![ByteAt::new(10, 2), ByteAt::new(20, 4)]);
    }

    #[test]
    fn set_value_by_label() {
        let mut table = CalibrationTable::new(vec![
            CalibrationEntry { label: "a".into(), offset: 10, stock: 1, value: 2 },
        ]);
        assert!(table.set_value("a", 9));
        assert!(!table.set_value("z", 9));
        assert_eq!(table.entries[0].value, 9);
    }

    #[test]
    fn override_replaces_or_appends() {
        let mut profile = PatchProfile {
            revision: "test".into(),
            layout: ChecksumLayout::default(),
            stock_values: vec![],
            patch_set: vec![ByteAt::new(10, 1)],
        };
        profile.override_patch(ByteAt::new(10, 7));
        profile.override_patch(ByteAt::new(11, 8));
        assert_eq!(profile.patch_set, vec![ByteAt::new(10, 7), ByteAt::new(11, 8)]);
        assert_eq!(profile.duplicate_offset(), None);

        profile.stock_values = vec![ByteAt::new(5, 0), ByteAt::new(5, 1)];
        assert_eq!(profile.duplicate_offset(), Some(5));
    }

    #[test]
    fn layout_defaults() {
        let layout = ChecksumLayout::default();
        assert_eq!(layout.field_offset, 0x18C);
        assert_eq!(layout.field_range(), Some(0x18C..0x190));
        assert_eq!(layout.coverage_start, 512);
    }

    #[test]
    fn field_must_fit_in_header() {
        let layout = |field_offset, coverage_start| ChecksumLayout { field_offset, coverage_start };
        assert_eq!(layout(0, 4).field_range(), Some(0..4));
        assert_eq!(layout(0x18C, 0x18F).field_range(), None);
        assert_eq!(layout(0x18C, 0).field_range(), None);
        assert_eq!(layout(usize::MAX, usize::MAX).field_range(), None);
        assert_eq!(layout(usize::MAX - 3, usize::MAX).field_range(), None);
    }

    #[test]
    fn profile_json_accepts_numbers_and_hex() {
        let json = r#"{
            "revision": "x",
            "stock_values": [{ "offset": "0x10", "value": 1 }],
            "patch_set": [{ "offset": 16, "value": 2 }]
        }"#;
        let profile: PatchProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.layout, ChecksumLayout::default());
        assert_eq!(profile.stock_values, vec![ByteAt::new(16, 1)]);
        assert_eq!(profile.patch_set, vec![ByteAt::new(16, 2)]);

        let text = serde_json::to_string(&profile).unwrap();
        assert!(text.contains(r#""offset":"0x10""#));
        assert_eq!(serde_json::from_str::<PatchProfile>(&text).unwrap(), profile);
    }

    #[cfg(feature = "rev-08-03")]
    #[test]
    fn builtin_08_03() {
        let profile = builtin("08.03").unwrap();
        assert_eq!(
            profile.stock_values,
            vec![
                ByteAt::new(0x3564EC, 0xBF),
                ByteAt::new(0x3564F4, 0xB7),
                ByteAt::new(0x35658C, 0xAF),
                ByteAt::new(0x356594, 0xA9),
                ByteAt::new(0x3565B0, 0xA1),
            ]
        );
        let values: Vec<u8> = profile.patch_set.iter().map(|b| b.value).collect();
        assert_eq!(values, vec![200, 196, 191, 186, 183]);
        let from_volts: Vec<Option<u8>> =
            [4.0, 3.92, 3.82, 3.72, 3.66].iter().map(|&v| voltage_to_byte(v)).collect();
        assert_eq!(from_volts, values.iter().map(|&v| Some(v)).collect::<Vec<_>>());
        assert_eq!(profile.layout, ChecksumLayout::default());
        assert!(builtin("09.00").is_none());
        assert_eq!(builtin_revisions(), &["08.03"]);
    }
}

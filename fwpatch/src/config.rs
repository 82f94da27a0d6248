//! Patch profiles on disk.
//!
//! A profile file is JSON. Offsets may be numbers or `"0x..."` strings, and
//! each battery level gives either the raw byte (`value`) or a voltage:
//!
//! ```json
//! {
//!   "revision": "08.03",
//!   "calibration": [
//!     { "label": "5 bars", "offset": "0x3564ec", "stock": 191, "voltage": 4.1 },
//!     { "label": "4 bars", "offset": "0x3564f4", "stock": 183, "value": 196 }
//!   ]
//! }
//! ```

use anyhow::{anyhow, bail, Context, Result};
use battpatch::profile::{self, offset_repr, parse_offset, voltage_to_byte};
use battpatch::{ByteAt, CalibrationEntry, CalibrationTable, ChecksumLayout, PatchProfile};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileFile {
    pub revision: String,
    #[serde(default)]
    pub layout: ChecksumLayout,
    pub calibration: Vec<LevelSpec>,
    /// Stock bytes that are checked but never patched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_stock: Vec<ByteAt>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    pub label: String,
    #[serde(with = "offset_repr")]
    pub offset: usize,
    pub stock: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
}

impl LevelSpec {
    fn resolve(&self) -> Result<u8> {
        match (self.value, self.voltage) {
            (Some(value), None) => Ok(value),
            (None, Some(volts)) => voltage_to_byte(volts)
                .ok_or_else(|| anyhow!("level {:?}: {} V does not fit in a byte", self.label, volts)),
            (Some(_), Some(_)) => bail!("level {:?}: give either value or voltage, not both", self.label),
            (None, None) => bail!("level {:?}: missing value or voltage", self.label),
        }
    }
}

impl ProfileFile {
    /// A profile compiled into battpatch, in file form.
    pub fn builtin(revision: &str) -> Result<Self> {
        let table = profile::builtin_calibration(revision).ok_or_else(|| {
            anyhow!(
                "no built-in profile for revision {:?} (known: {:?})",
                revision,
                profile::builtin_revisions()
            )
        })?;
        Ok(Self::from_table(revision, ChecksumLayout::default(), &table))
    }

    pub fn from_table(revision: &str, layout: ChecksumLayout, table: &CalibrationTable) -> Self {
        Self {
            revision: revision.to_string(),
            layout,
            calibration: table
                .entries
                .iter()
                .map(|e| LevelSpec {
                    label: e.label.clone(),
                    offset: e.offset,
                    stock: e.stock,
                    value: Some(e.value),
                    voltage: None,
                })
                .collect(),
            extra_stock: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading profile {:?}", path))?;
        let file: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing profile {:?}", path))?;
        tracing::debug!("loaded profile {:?} for revision {}", path, file.revision);
        Ok(file)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Resolves voltages and applies `levels` by label.
    pub fn calibration(&self, levels: &[LevelOverride]) -> Result<CalibrationTable> {
        let mut table = CalibrationTable::new(
            self.calibration
                .iter()
                .map(|spec| -> Result<CalibrationEntry> {
                    Ok(CalibrationEntry {
                        label: spec.label.clone(),
                        offset: spec.offset,
                        stock: spec.stock,
                        value: spec.resolve()?,
                    })
                })
                .collect::<Result<_>>()?,
        );

        for level in levels {
            let value = voltage_to_byte(level.volts)
                .ok_or_else(|| anyhow!("{} V does not fit in a byte", level.volts))?;
            if !table.set_value(&level.label, value) {
                bail!("profile {} has no level named {:?}", self.revision, level.label);
            }
        }
        Ok(table)
    }

    /// Builds the coordinator's profile, with `--level` and `--set`
    /// overrides applied.
    pub fn into_patch_profile(self, levels: &[LevelOverride], sets: &[ByteOverride]) -> Result<PatchProfile> {
        if self.layout.field_range().is_none() {
            bail!(
                "checksum field at {:#x} must end before the coverage start {:#x}",
                self.layout.field_offset,
                self.layout.coverage_start
            );
        }

        let table = self.calibration(levels)?;
        let mut patch = PatchProfile::from_calibration(self.revision, &table);
        patch.layout = self.layout;
        patch.stock_values.extend(self.extra_stock);
        for set in sets {
            patch.override_patch(set.0);
        }

        if let Some(offset) = patch.duplicate_offset() {
            bail!("offset {:#x} is listed more than once", offset);
        }
        Ok(patch)
    }
}

/// `OFFSET=BYTE`, both hex (`0x`) or decimal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteOverride(pub ByteAt);

impl FromStr for ByteOverride {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (offset, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected OFFSET=BYTE, got {:?}", s))?;
        let offset = parse_offset(offset).map_err(|e| format!("bad offset {:?}: {}", offset, e))?;
        let value = parse_offset(value)
            .ok()
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| format!("bad byte {:?}", value))?;
        Ok(Self(ByteAt::new(offset, value)))
    }
}

/// `LABEL=VOLTS`, e.g. `"5 bars=4.1"`.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelOverride {
    pub label: String,
    pub volts: f64,
}

impl FromStr for LevelOverride {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (label, volts) = s
            .rsplit_once('=')
            .ok_or_else(|| format!("expected LABEL=VOLTS, got {:?}", s))?;
        let volts = volts
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("bad voltage {:?}: {}", volts, e))?;
        Ok(Self {
            label: label.trim().to_string(),
            volts,
        })
    }
}

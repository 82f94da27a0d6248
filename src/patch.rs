//! Validate, patch, re-checksum.
//!
//! The only way to mutate an image through this module is
//! [`PatchCoordinator::patch`] (or its borrowing form), and both run the full
//! validation pass before the first byte is written. Either every patch byte
//! and the new checksum land, or nothing does.

use byteorder::{ByteOrder, LittleEndian};
use std::ops::Range;

use crate::crc::ChecksumEngine;
use crate::error::{Error, Result};
use crate::profile::{ByteAt, PatchProfile};

/// Outcome of a successful patch run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchReport {
    /// Checksum field contents before patching.
    pub previous_checksum: u32,
    /// Checksum now stored in the image.
    pub checksum: u32,
    /// Number of patch bytes that actually differed from the input.
    pub bytes_changed: usize,
}

/// A patched image, ready to be written out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchedImage {
    pub bytes: Vec<u8>,
    pub report: PatchReport,
}

impl PatchedImage {
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Stored versus recomputed checksum for an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChecksumReport {
    pub stored: u32,
    pub computed: u32,
}

impl ChecksumReport {
    pub fn is_consistent(&self) -> bool {
        self.stored == self.computed
    }
}

#[derive(Debug)]
pub struct PatchCoordinator {
    profile: PatchProfile,
    engine: ChecksumEngine,
}

impl PatchCoordinator {
    pub fn new(profile: PatchProfile) -> Self {
        let engine = ChecksumEngine::with_coverage_start(profile.layout.coverage_start);
        Self { profile, engine }
    }

    pub fn profile(&self) -> &PatchProfile {
        &self.profile
    }

    pub fn engine(&self) -> &ChecksumEngine {
        &self.engine
    }

    /// Checks that every offset we will read or write is inside `image`, then
    /// that every stock value matches. Stops at the first mismatch: a wrong
    /// byte means a different firmware revision, and the rest of the offsets
    /// mean nothing there.
    pub fn validate(&self, image: &[u8]) -> Result<()> {
        self.check_bounds(image)?;

        for &ByteAt { offset, value: expected } in &self.profile.stock_values {
            let found = image[offset];
            if found != expected {
                tracing::warn!(
                    "revision {} expects {:#04x} at {:#x}, image has {:#04x}",
                    self.profile.revision,
                    expected,
                    offset,
                    found
                );
                return Err(Error::VersionMismatch { offset, expected, found });
            }
        }

        tracing::debug!(
            "image matches revision {} at {} offsets",
            self.profile.revision,
            self.profile.stock_values.len()
        );
        Ok(())
    }

    /// Validates `image`, applies the patch set and embeds the new checksum.
    pub fn patch(&self, mut image: Vec<u8>) -> Result<PatchedImage> {
        let report = self.patch_in_place(&mut image)?;
        Ok(PatchedImage { bytes: image, report })
    }

    /// Borrowing form of [`patch`](Self::patch). On error, `image` has not
    /// been touched.
    pub fn patch_in_place(&self, image: &mut [u8]) -> Result<PatchReport> {
        self.validate(image)?;

        let field = self.checksum_field(image)?;
        let previous_checksum = LittleEndian::read_u32(&image[field.clone()]);

        let mut bytes_changed = 0;
        for &ByteAt { offset, value } in &self.profile.patch_set {
            if image[offset] != value {
                bytes_changed += 1;
            }
            image[offset] = value;
        }
        tracing::info!(
            "applied {} patch bytes ({} changed)",
            self.profile.patch_set.len(),
            bytes_changed
        );

        let checksum = self.engine.compute(image);
        LittleEndian::write_u32(&mut image[field], checksum);
        tracing::info!("new checksum {:08X} (was {:08X})", checksum, previous_checksum);

        Ok(PatchReport {
            previous_checksum,
            checksum,
            bytes_changed,
        })
    }

    /// Reads the checksum field and recomputes the checksum, without
    /// validating stock values.
    pub fn verify(&self, image: &[u8]) -> Result<ChecksumReport> {
        let field = self.checksum_field(image)?;
        Ok(ChecksumReport {
            stored: LittleEndian::read_u32(&image[field]),
            computed: self.engine.compute(image),
        })
    }

    /// The checksum field's range, once it's known to sit in the header and
    /// inside `image`.
    fn checksum_field(&self, image: &[u8]) -> Result<Range<usize>> {
        let layout = &self.profile.layout;
        let field = layout.field_range().ok_or(Error::OutOfBounds {
            offset: layout.field_offset,
            len: layout.coverage_start,
        })?;
        if field.end > image.len() {
            return Err(Error::OutOfBounds {
                offset: field.end - 1,
                len: image.len(),
            });
        }
        Ok(field)
    }

    fn check_bounds(&self, image: &[u8]) -> Result<()> {
        let len = image.len();
        let offsets = self
            .profile
            .stock_values
            .iter()
            .chain(&self.profile.patch_set)
            .map(|b| b.offset);

        for offset in offsets {
            if offset >= len {
                return Err(Error::OutOfBounds { offset, len });
            }
        }
        self.checksum_field(image).map(|_| ())
    }
}

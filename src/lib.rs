//! Battery calibration patching for `bisrv.asd` firmware images.
//!
//! The firmware keeps a handful of battery-level thresholds at fixed offsets
//! and refuses to load an image whose embedded checksum doesn't match its
//! contents. This crate rewrites those thresholds and fixes up the checksum:
//!
//! ```no_run
//! # fn main() -> battpatch::Result<()> {
//! let profile = battpatch::profile::builtin("08.03").unwrap();
//! let coordinator = battpatch::PatchCoordinator::new(profile);
//!
//! let image = battpatch::image::load("bisrv-08_03.asd")?;
//! let patched = coordinator.patch(image)?;
//! battpatch::image::store("bisrv-08_03.asd", "bisrv.asd", &patched.bytes)?;
//! # Ok(())
//! # }
//! ```

pub mod crc;
pub mod error;
pub mod image;
pub mod patch;
pub mod profile;

pub use crc::ChecksumEngine;
pub use error::{Error, Result};
pub use patch::{ChecksumReport, PatchCoordinator, PatchReport, PatchedImage};
pub use profile::{ByteAt, CalibrationEntry, CalibrationTable, ChecksumLayout, PatchProfile};

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Everything that can stop a patch run. None of these are retried: they mean
/// either a missing file or an image from a different firmware revision.
#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot read firmware image {path:?}: {source}")]
    SourceNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// `len` is the image length, or the header length when the checksum
    /// field doesn't fit in front of the coverage region.
    #[error("offset {offset:#x} is out of bounds ({len:#x} bytes available)")]
    OutOfBounds {
        offset: usize,
        len: usize,
    },
    #[error("firmware revision mismatch at offset {offset:#x}: expected {expected:#04x}, found {found:#04x}")]
    VersionMismatch {
        offset: usize,
        expected: u8,
        found: u8,
    },
    #[error("cannot write patched image {path:?}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

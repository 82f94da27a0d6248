//! Getting images in and out of memory.
//!
//! The coordinator never touches the filesystem; these are the collaborators
//! on either side of it.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Reads the whole image at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| Error::SourceNotFound {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!("read {} bytes from {:?}", bytes.len(), path);
    Ok(bytes)
}

/// Writes `bytes` to `output`, which must not be the image we read from.
///
/// The data goes to a temporary file next to `output` first and is renamed
/// into place once it is complete, so `output` is either the full image or
/// whatever was there before.
pub fn store(input: impl AsRef<Path>, output: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
    let (input, output) = (input.as_ref(), output.as_ref());
    let failure = |source| Error::WriteFailure {
        path: output.to_path_buf(),
        source,
    };

    if same_file(input, output) {
        return Err(failure(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "output would overwrite the input image",
        )));
    }

    let staging = staging_path(output);
    let written = write_synced(&staging, bytes).and_then(|()| fs::rename(&staging, output));
    if let Err(e) = written {
        let _ = fs::remove_file(&staging);
        return Err(failure(e));
    }

    tracing::info!("wrote {} bytes to {:?}", bytes.len(), output);
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn staging_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    output.with_file_name(name)
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

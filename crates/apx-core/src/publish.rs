//! Publish stage: copy finished artifacts into the user's output directory.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::StageError;

/// Copy `file` to `<output_dir>/<file-name>`, overwriting any existing file.
///
/// # Errors
///
/// Returns [`StageError::Io`] if the directory cannot be created or the copy
/// fails.
pub fn publish(file: &Path, output_dir: &Path) -> Result<PathBuf, StageError> {
    let name = file.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", file.display()),
        )
    })?;

    fs::create_dir_all(output_dir)?;
    let dest = output_dir.join(name);
    fs::copy(file, &dest)?;

    debug!(path = %dest.display(), sha256 = %sha256_file(&dest)?, "published");
    Ok(dest)
}

/// Hex SHA-256 digest of a file.
///
/// # Errors
///
/// Returns the IO error if the file cannot be read.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

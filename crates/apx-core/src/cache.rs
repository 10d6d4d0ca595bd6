//! Staging cache: the `raw/`, `aligned/` and `signed/` directories of one run.
//!
//! The cache is ephemeral. It is wiped before every run, and its staging
//! directories are dropped mid-run in low-storage mode once every artifact has
//! moved past them.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::CacheError;

/// The staging directory triple under one cache root.
#[derive(Debug, Clone)]
pub struct CacheDirs {
    root: PathBuf,
    raw: PathBuf,
    aligned: PathBuf,
    signed: PathBuf,
    low_storage: bool,
}

/// A deletion that failed during end-of-run cleanup.
#[derive(Debug)]
pub struct CleanupFailure {
    /// Path that could not be deleted.
    pub path: PathBuf,
    /// Underlying filesystem error.
    pub error: io::Error,
}

impl CacheDirs {
    /// Wipe `root` and lay out a fresh staging triple.
    ///
    /// `aligned/` and `signed/` are created eagerly; `raw/` is created by the
    /// writer when the first artifact lands.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Purge`] if a stale cache cannot be removed, and
    /// [`CacheError::Create`] if a staging directory cannot be created.
    pub fn prepare(root: impl Into<PathBuf>, low_storage: bool) -> Result<Self, CacheError> {
        let root = root.into();

        match fs::remove_dir_all(&root) {
            Ok(()) => debug!(path = %root.display(), "cleared stale cache"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(CacheError::Purge { path: root, source }),
        }

        let dirs = Self {
            raw: root.join("raw"),
            aligned: root.join("aligned"),
            signed: root.join("signed"),
            root,
            low_storage,
        };

        for dir in [&dirs.aligned, &dirs.signed] {
            fs::create_dir_all(dir).map_err(|source| CacheError::Create {
                path: dir.clone(),
                source,
            })?;
        }

        Ok(dirs)
    }

    /// Cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Patched, unaligned, unsigned copies.
    pub fn raw(&self) -> &Path {
        &self.raw
    }

    /// Aligned copies.
    pub fn aligned(&self) -> &Path {
        &self.aligned
    }

    /// Signed copies.
    pub fn signed(&self) -> &Path {
        &self.signed
    }

    /// Recursively delete `dir`.
    ///
    /// Without `force` this is a no-op unless the cache is in low-storage mode.
    /// A directory that does not exist counts as deleted. Returns whether a
    /// deletion was performed.
    ///
    /// # Errors
    ///
    /// Returns the filesystem error if the directory exists but cannot be
    /// removed.
    pub fn delete(&self, dir: &Path, force: bool) -> io::Result<bool> {
        if !force && !self.low_storage {
            return Ok(false);
        }

        match fs::remove_dir_all(dir) {
            Ok(()) => {
                debug!(path = %dir.display(), "deleted staging directory");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Apply the end-of-run clean policy.
    ///
    /// With `clean` set the whole cache root is removed. If the run also
    /// deployed to a device, the published files are removed too, since the
    /// device holds the payload. Nothing here is fatal: failures are logged
    /// and returned for reporting.
    pub fn finish(&self, clean: bool, published: &[PathBuf], deployed: bool) -> Vec<CleanupFailure> {
        let mut failures = Vec::new();
        if !clean {
            return failures;
        }

        if let Err(error) = self.delete(&self.root, true) {
            warn!(path = %self.root.display(), %error, "failed to delete cache");
            failures.push(CleanupFailure {
                path: self.root.clone(),
                error,
            });
        }

        if deployed {
            for file in published {
                match fs::remove_file(file) {
                    Ok(()) => debug!(path = %file.display(), "deleted published file"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(error) => {
                        warn!(path = %file.display(), %error, "failed to delete published file");
                        failures.push(CleanupFailure {
                            path: file.clone(),
                            error,
                        });
                    }
                }
            }
        }

        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_prepare_wipes_stale_cache() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("cache");
        fs::create_dir_all(root.join("raw")).unwrap();
        fs::write(root.join("raw/stale.apk"), b"old").unwrap();

        let dirs = CacheDirs::prepare(&root, false).unwrap();

        assert!(!dirs.raw().exists());
        assert!(dirs.aligned().is_dir());
        assert!(dirs.signed().is_dir());
    }

    #[test]
    fn test_prepare_fails_when_root_is_a_file() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("cache");
        fs::write(&root, b"not a directory").unwrap();

        let err = CacheDirs::prepare(&root, false).unwrap_err();
        assert!(matches!(err, CacheError::Purge { .. }));
    }

    #[test]
    fn test_delete_respects_low_storage() {
        let tmp = tempdir().unwrap();
        let dirs = CacheDirs::prepare(tmp.path().join("cache"), false).unwrap();

        assert!(!dirs.delete(dirs.aligned(), false).unwrap());
        assert!(dirs.aligned().exists());

        assert!(dirs.delete(dirs.aligned(), true).unwrap());
        assert!(!dirs.aligned().exists());

        let conserving = CacheDirs::prepare(tmp.path().join("cache2"), true).unwrap();
        assert!(conserving.delete(conserving.signed(), false).unwrap());
        assert!(!conserving.signed().exists());
        // Missing directories are already gone.
        assert!(conserving.delete(conserving.raw(), false).unwrap());
    }

    #[test]
    fn test_finish_without_clean_keeps_everything() {
        let tmp = tempdir().unwrap();
        let dirs = CacheDirs::prepare(tmp.path().join("cache"), false).unwrap();
        let out = tmp.path().join("app.apk");
        fs::write(&out, b"apk").unwrap();

        let failures = dirs.finish(false, std::slice::from_ref(&out), true);

        assert!(failures.is_empty());
        assert!(dirs.root().exists());
        assert!(out.exists());
    }

    #[test]
    fn test_finish_clean_removes_published_only_when_deployed() {
        let tmp = tempdir().unwrap();
        let out = tmp.path().join("app.apk");
        fs::write(&out, b"apk").unwrap();

        let dirs = CacheDirs::prepare(tmp.path().join("cache"), false).unwrap();
        assert!(dirs.finish(true, std::slice::from_ref(&out), false).is_empty());
        assert!(!dirs.root().exists());
        assert!(out.exists());

        let dirs = CacheDirs::prepare(tmp.path().join("cache"), false).unwrap();
        assert!(dirs.finish(true, std::slice::from_ref(&out), true).is_empty());
        assert!(!dirs.root().exists());
        assert!(!out.exists());
    }
}

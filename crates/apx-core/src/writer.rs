//! Artifact writer: materializes a patched artifact into `raw/`.
//!
//! The original APK is copied byte-for-byte, then (when there is anything to
//! change) rewritten entry by entry into a temporary file next to the copy:
//!
//! 1. Untouched entries are copied raw, without recompression.
//! 2. Patched resources are overlaid at the archive root, replacing entries of
//!    the same name.
//! 3. Entries on the do-not-compress list are stored uncompressed.
//! 4. For the base artifact only, dex blobs are added as top-level entries.
//!
//! The temporary file replaces the copy only once the archive is finished.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::artifact::Artifact;
use crate::error::WriteError;

/// Writes patched artifacts into the raw staging directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    raw_dir: PathBuf,
}

impl ArtifactWriter {
    /// Create a writer targeting `raw_dir`.
    pub fn new(raw_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
        }
    }

    /// Materialize `artifact` as `raw/<file-name>` and return its path.
    ///
    /// On failure no file is left behind under that name.
    ///
    /// # Errors
    ///
    /// Returns a [`WriteError`] if the copy, the resource walk or any archive
    /// operation fails.
    pub fn write(&self, artifact: &Artifact) -> Result<PathBuf, WriteError> {
        fs::create_dir_all(&self.raw_dir)?;
        let dest = self.raw_dir.join(artifact.file_name());

        let result = fs::copy(artifact.source(), &dest)
            .map_err(WriteError::from)
            .and_then(|_| self.patch(artifact, &dest));

        if result.is_err() {
            match fs::remove_file(&dest) {
                Ok(()) => debug!(path = %dest.display(), "removed partial raw file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(error) => warn!(path = %dest.display(), %error, "failed to remove partial raw file"),
            }
        }
        result.map(|()| dest)
    }

    fn patch(&self, artifact: &Artifact, dest: &Path) -> Result<(), WriteError> {
        let overlay = match artifact.resources() {
            Some(dir) => collect_overlay(dir)?,
            None => Vec::new(),
        };
        let dex = if artifact.variant().is_base() {
            artifact.dex()
        } else {
            &[]
        };

        if artifact.resources().is_none() && dex.is_empty() {
            debug!(artifact = %artifact.file_name(), "no patched content, raw copy only");
            return Ok(());
        }

        let stored: HashSet<&str> = if artifact.resources().is_some() {
            artifact.do_not_compress().iter().map(String::as_str).collect()
        } else {
            HashSet::new()
        };

        let replaced: HashSet<&str> = overlay
            .iter()
            .map(|(name, _)| name.as_str())
            .chain(dex.iter().map(|blob| blob.name.as_str()))
            .collect();

        let mut staged = tempfile::NamedTempFile::new_in(&self.raw_dir)?;
        {
            let mut archive = ZipArchive::new(File::open(dest)?)?;
            let mut out = ZipWriter::new(staged.as_file_mut());

            for i in 0..archive.len() {
                let (name, method, is_dir) = {
                    let entry = archive.by_index_raw(i)?;
                    (entry.name().to_string(), entry.compression(), entry.is_dir())
                };

                if replaced.contains(name.as_str()) {
                    continue;
                }

                if !is_dir && stored.contains(name.as_str()) && method != CompressionMethod::Stored {
                    let mut entry = archive.by_index(i)?;
                    out.start_file(name.as_str(), options_for(true))?;
                    io::copy(&mut entry, &mut out)?;
                } else {
                    out.raw_copy_file(archive.by_index_raw(i)?)?;
                }
            }

            for (name, path) in &overlay {
                out.start_file(name.as_str(), options_for(stored.contains(name.as_str())))?;
                io::copy(&mut File::open(path)?, &mut out)?;
            }

            for blob in dex {
                out.start_file(blob.name.as_str(), options_for(stored.contains(blob.name.as_str())))?;
                out.write_all(&blob.data)?;
            }

            out.finish()?;
        }

        staged.as_file().sync_all()?;
        staged.persist(dest).map_err(|e| e.error)?;

        debug!(
            artifact = %artifact.file_name(),
            resources = overlay.len(),
            dex = dex.len(),
            "wrote patched archive"
        );
        Ok(())
    }
}

fn options_for(stored: bool) -> SimpleFileOptions {
    let method = if stored {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    };
    SimpleFileOptions::default().compression_method(method)
}

/// Every file under `dir`, keyed by its `/`-separated path relative to `dir`.
fn collect_overlay(dir: &Path) -> Result<Vec<(String, PathBuf)>, WriteError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| WriteError::InvalidEntry(entry.path().to_path_buf()))?;

        let mut parts = Vec::new();
        for component in rel.components() {
            let part = component
                .as_os_str()
                .to_str()
                .ok_or_else(|| WriteError::InvalidEntry(entry.path().to_path_buf()))?;
            parts.push(part);
        }

        files.push((parts.join("/"), entry.into_path()));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{DexBlob, Variant};
    use std::io::Read;
    use tempfile::tempdir;

    fn fixture_apk(path: &Path) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        let deflated = options_for(false);
        for (name, body) in [
            ("AndroidManifest.xml", "<manifest/>"),
            ("resources.arsc", "table-v1"),
            ("res/layout/main.xml", "<old/>"),
            ("classes.dex", "dex-v1"),
        ] {
            zip.start_file(name, deflated).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn read_entry(path: &Path, name: &str) -> (String, CompressionMethod) {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        (body, entry.compression())
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        archive.file_names().map(str::to_string).collect()
    }

    #[test]
    fn test_plain_artifact_is_byte_identical_copy() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("app.apk");
        fixture_apk(&src);

        let writer = ArtifactWriter::new(tmp.path().join("raw"));
        let out = writer
            .write(&Artifact::new(&src, "com.example", Variant::Base))
            .unwrap();

        assert_eq!(out, tmp.path().join("raw/app.apk"));
        assert_eq!(fs::read(&src).unwrap(), fs::read(&out).unwrap());
    }

    #[test]
    fn test_overlay_resources_and_store_uncompressed() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("app.apk");
        fixture_apk(&src);

        let res = tmp.path().join("patched");
        fs::create_dir_all(res.join("res/layout")).unwrap();
        fs::create_dir_all(res.join("res/values")).unwrap();
        fs::write(res.join("res/layout/main.xml"), "<new/>").unwrap();
        fs::write(res.join("res/values/strings.xml"), "<resources/>").unwrap();

        let artifact = Artifact::new(&src, "com.example", Variant::Base)
            .with_resources(&res)
            .with_do_not_compress(vec!["resources.arsc".to_string()]);

        let out = ArtifactWriter::new(tmp.path().join("raw"))
            .write(&artifact)
            .unwrap();

        assert_eq!(read_entry(&out, "res/layout/main.xml").0, "<new/>");
        assert_eq!(read_entry(&out, "res/values/strings.xml").0, "<resources/>");
        assert_eq!(
            read_entry(&out, "resources.arsc"),
            ("table-v1".to_string(), CompressionMethod::Stored)
        );
        assert_eq!(
            read_entry(&out, "AndroidManifest.xml").1,
            CompressionMethod::Deflated
        );

        let names = entry_names(&out);
        assert_eq!(
            names.iter().filter(|n| *n == "res/layout/main.xml").count(),
            1
        );
        // The original is never touched.
        assert_eq!(read_entry(&src, "res/layout/main.xml").0, "<old/>");
    }

    #[test]
    fn test_dex_blobs_only_for_base() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("app.apk");
        fixture_apk(&src);
        let split_src = tmp.path().join("app_lang.apk");
        fixture_apk(&split_src);

        let dex = vec![
            DexBlob {
                name: "classes.dex".to_string(),
                data: b"dex-v2".to_vec(),
            },
            DexBlob {
                name: "classes2.dex".to_string(),
                data: b"dex-extra".to_vec(),
            },
        ];
        let writer = ArtifactWriter::new(tmp.path().join("raw"));

        let base = writer
            .write(&Artifact::new(&src, "com.example", Variant::Base).with_dex(dex.clone()))
            .unwrap();
        assert_eq!(read_entry(&base, "classes.dex").0, "dex-v2");
        assert_eq!(read_entry(&base, "classes2.dex").0, "dex-extra");

        let split = writer
            .write(&Artifact::new(&split_src, "com.example", Variant::Language).with_dex(dex))
            .unwrap();
        assert_eq!(read_entry(&split, "classes.dex").0, "dex-v1");
        assert!(!entry_names(&split).contains(&"classes2.dex".to_string()));
    }

    #[test]
    fn test_corrupt_archive_leaves_no_raw_file() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("broken.apk");
        fs::write(&src, b"definitely not a zip").unwrap();
        let res = tmp.path().join("patched");
        fs::create_dir_all(&res).unwrap();
        fs::write(res.join("resources.arsc"), "x").unwrap();

        let writer = ArtifactWriter::new(tmp.path().join("raw"));
        let err = writer
            .write(&Artifact::new(&src, "com.example", Variant::Base).with_resources(&res))
            .unwrap_err();

        assert!(matches!(err, WriteError::Archive(_)));
        assert!(!tmp.path().join("raw/broken.apk").exists());
    }

    #[test]
    fn test_missing_source_leaves_no_raw_file() {
        let tmp = tempdir().unwrap();
        let writer = ArtifactWriter::new(tmp.path().join("raw"));

        let err = writer
            .write(&Artifact::new(tmp.path().join("gone.apk"), "com.example", Variant::Base))
            .unwrap_err();

        assert!(matches!(err, WriteError::Io(_)));
        assert_eq!(fs::read_dir(tmp.path().join("raw")).unwrap().count(), 0);
    }
}

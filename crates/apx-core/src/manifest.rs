//! Build manifest parsing.
//!
//! The patcher hands its output over as a TOML manifest (`apx.toml`) that
//! names the base APK, its splits, and the patched resources and dex code to
//! fold into each one:
//!
//! ```toml
//! package = "com.example"
//!
//! [base]
//! file = "app.apk"
//! resources = "patched/base"
//! do_not_compress = ["resources.arsc"]
//! dex = ["patched/classes.dex", "patched/classes2.dex"]
//!
//! [[split]]
//! file = "split_config.en.apk"
//! resources = "patched/en"
//! ```
//!
//! Relative paths resolve against the manifest's directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, ArtifactSet, DexBlob, Variant};
use crate::error::ManifestError;

/// Parsed `apx.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildManifest {
    /// Application package shared by every artifact.
    pub package: String,
    /// The base APK.
    pub base: ArtifactEntry,
    /// Split APKs.
    #[serde(default, rename = "split")]
    pub splits: Vec<ArtifactEntry>,
    #[serde(skip)]
    root: PathBuf,
}

/// One `[base]` or `[[split]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactEntry {
    /// Original APK file.
    pub file: PathBuf,
    /// Package override; defaults to the manifest's package.
    #[serde(default)]
    pub package: Option<String>,
    /// Split kind; inferred from the file name when omitted.
    #[serde(default)]
    pub kind: Option<Variant>,
    /// Directory of patched resources to overlay at the archive root.
    #[serde(default)]
    pub resources: Option<PathBuf>,
    /// Archive paths to store uncompressed.
    #[serde(default)]
    pub do_not_compress: Vec<String>,
    /// Compiled dex files (base only).
    #[serde(default)]
    pub dex: Vec<PathBuf>,
}

impl BuildManifest {
    /// Read and parse a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Read`] or [`ManifestError::Parse`].
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest: Self = toml::from_str(&content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        manifest.root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(manifest)
    }

    /// Parse manifest text with relative paths anchored at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Parse`] if the text does not match the schema.
    pub fn parse(content: &str, root: impl Into<PathBuf>) -> Result<Self, ManifestError> {
        let root = root.into();
        let mut manifest: Self = toml::from_str(content).map_err(|source| ManifestError::Parse {
            path: root.join("apx.toml"),
            source,
        })?;
        manifest.root = root;
        Ok(manifest)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn artifact(&self, entry: &ArtifactEntry, variant: Variant) -> Result<Artifact, ManifestError> {
        let package = entry.package.as_deref().unwrap_or(&self.package);
        let mut artifact = Artifact::new(self.resolve(&entry.file), package, variant)
            .with_do_not_compress(entry.do_not_compress.clone());

        if let Some(resources) = &entry.resources {
            artifact = artifact.with_resources(self.resolve(resources));
        }

        if !entry.dex.is_empty() {
            if !variant.is_base() {
                return Err(ManifestError::Invalid(format!(
                    "{}: dex code is only allowed on the base",
                    entry.file.display()
                )));
            }
            let dex = entry
                .dex
                .iter()
                .map(|p| self.load_dex(p))
                .collect::<Result<Vec<_>, _>>()?;
            artifact = artifact.with_dex(dex);
        }

        Ok(artifact)
    }

    fn load_dex(&self, path: &Path) -> Result<DexBlob, ManifestError> {
        let full = self.resolve(path);
        let data = fs::read(&full).map_err(|source| ManifestError::Dex {
            path: full.clone(),
            source,
        })?;
        let name = crate::paths::file_name_of(&full)
            .ok_or_else(|| ManifestError::Invalid(format!("{} has no file name", full.display())))?;
        Ok(DexBlob { name, data })
    }

    /// Build the validated artifact set, loading dex bytes from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Dex`] if a dex file cannot be read and
    /// [`ManifestError::Invalid`] if the artifacts break a set invariant.
    pub fn into_artifact_set(self) -> Result<ArtifactSet, ManifestError> {
        if let Some(kind) = self.base.kind.filter(|k| !k.is_base()) {
            return Err(ManifestError::Invalid(format!(
                "[base] declares kind = \"{kind}\""
            )));
        }
        let base = self.artifact(&self.base, Variant::Base)?;

        let splits = self
            .splits
            .iter()
            .map(|entry| {
                let variant = entry.kind.unwrap_or_else(|| {
                    let name = crate::paths::file_name_of(&entry.file).unwrap_or_default();
                    Variant::infer_split(&name)
                });
                self.artifact(entry, variant)
            })
            .collect::<Result<Vec<_>, _>>()?;

        ArtifactSet::new(base, splits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_resolves_relative_paths_and_infers_kinds() {
        let manifest = BuildManifest::parse(
            r#"
            package = "com.example"

            [base]
            file = "app.apk"
            resources = "patched/base"
            do_not_compress = ["resources.arsc"]

            [[split]]
            file = "split_config.en.apk"

            [[split]]
            file = "/abs/split_config.arm64_v8a.apk"

            [[split]]
            file = "extra.apk"
            kind = "language"
            "#,
            "/work",
        )
        .unwrap();

        let set = manifest.into_artifact_set().unwrap();
        let kinds: Vec<_> = set.iter().map(Artifact::variant).collect();
        assert_eq!(
            kinds,
            [Variant::Language, Variant::Library, Variant::Language, Variant::Base]
        );

        let base = set.base();
        assert_eq!(base.source(), Path::new("/work/app.apk"));
        assert_eq!(base.resources(), Some(Path::new("/work/patched/base")));
        assert_eq!(base.do_not_compress(), ["resources.arsc"]);
        assert_eq!(
            set.iter().nth(1).unwrap().source(),
            Path::new("/abs/split_config.arm64_v8a.apk")
        );
    }

    #[test]
    fn test_load_reads_dex_blobs() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("classes.dex"), b"dex\n035\0").unwrap();
        let path = tmp.path().join("apx.toml");
        fs::write(
            &path,
            "package = \"com.example\"\n[base]\nfile = \"app.apk\"\ndex = [\"classes.dex\"]\n",
        )
        .unwrap();

        let set = BuildManifest::load(&path).unwrap().into_artifact_set().unwrap();

        let dex = set.base().dex();
        assert_eq!(dex.len(), 1);
        assert_eq!(dex[0].name, "classes.dex");
        assert_eq!(dex[0].data, b"dex\n035\0");
    }

    #[test]
    fn test_missing_dex_is_reported() {
        let manifest = BuildManifest::parse(
            "package = \"com.example\"\n[base]\nfile = \"app.apk\"\ndex = [\"gone.dex\"]\n",
            "/nonexistent",
        )
        .unwrap();
        let err = manifest.into_artifact_set().unwrap_err();
        assert!(matches!(err, ManifestError::Dex { .. }));
    }

    #[test]
    fn test_dex_on_split_rejected() {
        let manifest = BuildManifest::parse(
            "package = \"com.example\"\n[base]\nfile = \"app.apk\"\n\
             [[split]]\nfile = \"s.apk\"\ndex = [\"classes.dex\"]\n",
            "/work",
        )
        .unwrap();
        assert!(matches!(
            manifest.into_artifact_set(),
            Err(ManifestError::Invalid(_))
        ));
    }

    #[test]
    fn test_split_package_mismatch_rejected() {
        let manifest = BuildManifest::parse(
            "package = \"com.example\"\n[base]\nfile = \"app.apk\"\n\
             [[split]]\nfile = \"s.apk\"\npackage = \"com.other\"\n",
            "/work",
        )
        .unwrap();
        assert!(manifest.into_artifact_set().is_err());
    }

    #[test]
    fn test_unknown_field_is_parse_error() {
        let err = BuildManifest::parse(
            "package = \"com.example\"\n[base]\nfile = \"app.apk\"\ncompress = true\n",
            "/work",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }
}

//! Patched artifacts and the per-run artifact set.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;

/// Which kind of APK an artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// The base APK. Exactly one per run; the only one carrying dex code.
    Base,
    /// A configuration split holding locale resources.
    Language,
    /// A configuration split holding native libraries for one ABI.
    Library,
    /// A split holding assets or density resources.
    Asset,
}

/// ABI names used by `config.<abi>` library splits.
const ABI_SPLITS: &[&str] = &["arm64_v8a", "armeabi_v7a", "armeabi", "x86", "x86_64"];

impl Variant {
    /// Returns `true` for the base APK.
    pub fn is_base(self) -> bool {
        self == Self::Base
    }

    /// Infer a split's kind from its file name.
    ///
    /// `config.<abi>` is a library split, `config.<locale>` (two or three
    /// lowercase letters, optionally with a region) is a language split,
    /// anything else is treated as an asset split.
    pub fn infer_split(file_name: &str) -> Self {
        let stem = file_name.strip_suffix(".apk").unwrap_or(file_name);
        let Some(config) = stem.rsplit_once("config.").map(|(_, c)| c) else {
            return Self::Asset;
        };

        if ABI_SPLITS.contains(&config) {
            return Self::Library;
        }

        let lang = config.split(['_', '-']).next().unwrap_or(config);
        if (2..=3).contains(&lang.len()) && lang.chars().all(|c| c.is_ascii_lowercase()) {
            Self::Language
        } else {
            Self::Asset
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Base => "base",
            Self::Language => "split-language",
            Self::Library => "split-library",
            Self::Asset => "split-asset",
        };
        f.write_str(name)
    }
}

/// One compiled dex file produced by the patcher.
#[derive(Clone, PartialEq, Eq)]
pub struct DexBlob {
    /// Archive entry name, e.g. `classes2.dex`.
    pub name: String,
    /// Raw dex bytes.
    pub data: Vec<u8>,
}

impl fmt::Debug for DexBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DexBlob")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .finish()
    }
}

/// One APK variant to be carried through the pipeline.
#[derive(Debug, Clone)]
pub struct Artifact {
    source: PathBuf,
    package: String,
    variant: Variant,
    resources: Option<PathBuf>,
    do_not_compress: Vec<String>,
    dex: Vec<DexBlob>,
}

impl Artifact {
    /// Create an artifact from the original (unpatched) APK file.
    pub fn new(source: impl Into<PathBuf>, package: impl Into<String>, variant: Variant) -> Self {
        Self {
            source: source.into(),
            package: package.into(),
            variant,
            resources: None,
            do_not_compress: Vec::new(),
            dex: Vec::new(),
        }
    }

    /// Attach the directory of patched resources to overlay at the archive root.
    pub fn with_resources(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resources = Some(dir.into());
        self
    }

    /// Archive paths that must be stored uncompressed.
    pub fn with_do_not_compress(mut self, paths: Vec<String>) -> Self {
        self.do_not_compress = paths;
        self
    }

    /// Attach compiled dex code. Only honoured for the base artifact.
    pub fn with_dex(mut self, dex: Vec<DexBlob>) -> Self {
        self.dex = dex;
        self
    }

    /// Original APK this artifact was patched from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Application package name.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Variant kind.
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Patched resource directory, if any.
    pub fn resources(&self) -> Option<&Path> {
        self.resources.as_deref()
    }

    /// Paths to store uncompressed.
    pub fn do_not_compress(&self) -> &[String] {
        &self.do_not_compress
    }

    /// Dex blobs (empty for splits).
    pub fn dex(&self) -> &[DexBlob] {
        &self.dex
    }

    /// File name shared by every staged copy of this artifact.
    pub fn file_name(&self) -> String {
        crate::paths::file_name_of(&self.source).unwrap_or_else(|| format!("{}.apk", self.package))
    }
}

/// The ordered artifacts of one run: splits first, base last.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    artifacts: Vec<Artifact>,
}

impl ArtifactSet {
    /// Build the set from the base artifact and its splits.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Invalid`] if `base` is not a base variant, a
    /// split is a base variant or belongs to another package, or two
    /// artifacts share a file name (staged files are keyed by name).
    pub fn new(base: Artifact, splits: Vec<Artifact>) -> Result<Self, ManifestError> {
        if !base.variant.is_base() {
            return Err(ManifestError::Invalid(format!(
                "{} is a {} artifact, expected base",
                base.file_name(),
                base.variant
            )));
        }

        let mut names = HashSet::new();
        names.insert(base.file_name());

        for split in &splits {
            if split.variant.is_base() {
                return Err(ManifestError::Invalid(format!(
                    "{} is a second base artifact",
                    split.file_name()
                )));
            }
            if split.package != base.package {
                return Err(ManifestError::Invalid(format!(
                    "split {} belongs to {}, base is {}",
                    split.file_name(),
                    split.package,
                    base.package
                )));
            }
            if !names.insert(split.file_name()) {
                return Err(ManifestError::Invalid(format!(
                    "duplicate artifact file name {}",
                    split.file_name()
                )));
            }
        }

        let mut artifacts = splits;
        artifacts.push(base);
        Ok(Self { artifacts })
    }

    /// The base artifact.
    pub fn base(&self) -> &Artifact {
        // `new` always pushes the base last.
        &self.artifacts[self.artifacts.len() - 1]
    }

    /// Package name shared by every artifact.
    pub fn package(&self) -> &str {
        self.base().package()
    }

    /// Iterate in processing order (splits, then base).
    pub fn iter(&self) -> std::slice::Iter<'_, Artifact> {
        self.artifacts.iter()
    }

    /// Number of artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Always `false`: a set holds at least the base.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

impl<'a> IntoIterator for &'a ArtifactSet {
    type Item = &'a Artifact;
    type IntoIter = std::slice::Iter<'a, Artifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

//! Generated file set and the canonical on-disk layout for published apps.

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::ExtractionError;

/// File name of the application entry point.
pub const MAIN_SOURCE_FILE: &str = "main.dart";
/// File name of the package manifest, written at the repository root.
pub const MANIFEST_FILE: &str = "pubspec.yaml";
/// Directory the entry point is published under.
pub const SOURCE_DIR: &str = "lib";
/// Path prefix that marks a generated file as a bundled asset.
pub const ASSET_DIR_PREFIX: &str = "assets/";

/// The required roles a generated file can fill.
///
/// Assets are tracked by their relative path instead of a role; only the
/// two files every app must have are enumerated here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    MainSource,
    Manifest,
}

impl FileRole {
    /// The concrete file name this role maps to.
    pub fn file_name(&self) -> &'static str {
        match self {
            FileRole::MainSource => MAIN_SOURCE_FILE,
            FileRole::Manifest => MANIFEST_FILE,
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Returns true when `path` is a well-formed relative asset path.
///
/// Asset paths must live under `assets/`, stay relative, and must not
/// contain parent-directory or empty segments. Anything else is rejected
/// so a file set can be written to disk without further path checks.
pub fn is_asset_path(path: &str) -> bool {
    if !path.starts_with(ASSET_DIR_PREFIX) || path.ends_with('/') {
        return false;
    }
    if path.contains('\\') {
        return false;
    }
    path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

/// A complete, structurally valid set of generated files.
///
/// Construction goes through [`FileSetBuilder`], which guarantees the
/// entry point and manifest are present and every asset path passed
/// [`is_asset_path`]. Holders of a `FileSet` can rely on that.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSet {
    main_source: String,
    manifest: String,
    assets: BTreeMap<String, String>,
}

impl FileSet {
    pub fn main_source(&self) -> &str {
        &self.main_source
    }

    pub fn manifest(&self) -> &str {
        &self.manifest
    }

    /// Asset entries as `(relative path, content)` pairs, ordered by path.
    pub fn assets(&self) -> impl Iterator<Item = (&str, &str)> {
        self.assets.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn has_asset(&self, path: &str) -> bool {
        self.assets.contains_key(path)
    }

    pub fn has_asset_under(&self, dir_prefix: &str) -> bool {
        self.assets.keys().any(|k| k.starts_with(dir_prefix))
    }

    /// All files as `(repository-relative path, content)` pairs in the
    /// canonical published layout: `lib/main.dart`, `pubspec.yaml` at the
    /// root, and assets at their own relative paths.
    pub fn entries(&self) -> Vec<(String, &str)> {
        let mut out = Vec::with_capacity(2 + self.assets.len());
        out.push((format!("{SOURCE_DIR}/{MAIN_SOURCE_FILE}"), self.main_source.as_str()));
        out.push((MANIFEST_FILE.to_string(), self.manifest.as_str()));
        for (path, content) in &self.assets {
            out.push((path.clone(), content.as_str()));
        }
        out
    }
}

/// Accumulates generated files and checks completeness on `build`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileSetBuilder {
    main_source: Option<String>,
    manifest: Option<String>,
    assets: BTreeMap<String, String>,
}

impl FileSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entry point content. A later call replaces an earlier one.
    pub fn set_main_source(&mut self, content: impl Into<String>) {
        self.main_source = Some(content.into());
    }

    /// Sets the manifest content. A later call replaces an earlier one.
    pub fn set_manifest(&mut self, content: impl Into<String>) {
        self.manifest = Some(content.into());
    }

    /// Records an asset under its relative path. Returns false (and stores
    /// nothing) when the path is not a valid asset path.
    pub fn add_asset(&mut self, path: impl Into<String>, content: impl Into<String>) -> bool {
        let path = path.into();
        if !is_asset_path(&path) {
            return false;
        }
        self.assets.insert(path, content.into());
        true
    }

    pub fn has_main_source(&self) -> bool {
        self.main_source.is_some()
    }

    pub fn has_manifest(&self) -> bool {
        self.manifest.is_some()
    }

    /// Required roles not yet filled, in a stable order.
    pub fn missing(&self) -> Vec<FileRole> {
        let mut missing = Vec::new();
        if self.main_source.is_none() {
            missing.push(FileRole::MainSource);
        }
        if self.manifest.is_none() {
            missing.push(FileRole::Manifest);
        }
        missing
    }

    /// Finishes the build, failing with the list of missing roles and the
    /// partially recovered content when the set is incomplete.
    pub fn build(self) -> Result<FileSet, ExtractionError> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(ExtractionError::incomplete(missing, self));
        }
        // Both options checked above.
        let (main_source, manifest) = match (self.main_source, self.manifest) {
            (Some(m), Some(p)) => (m, p),
            _ => unreachable!("missing() returned empty with an unset role"),
        };
        Ok(FileSet {
            main_source,
            manifest,
            assets: self.assets,
        })
    }
}

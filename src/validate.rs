//! Structural validation of recovered file sets.
//!
//! Five checks run in a fixed order and the first failure wins:
//! leaked generation markup, manifest YAML syntax, declared-but-missing
//! assets, the `void main(` entry point, and a heuristic scan for
//! non-nullable fields declared without an initializer. Everything here
//! is line-oriented text analysis; nothing compiles the generated code.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::ValidationError;
use crate::extract::is_filename_marker;
use crate::fileset::FileSet;

/// The entry point signature every generated app must contain.
const ENTRYPOINT_MARKER: &str = "void main(";

/// The five checks, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    LeakedMarkup,
    MalformedManifest,
    MissingAsset,
    MissingEntrypoint,
    UninitializedField,
}

impl ValidationKind {
    /// Stable machine-readable tag for logs and API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationKind::LeakedMarkup => "LEAKED_MARKUP",
            ValidationKind::MalformedManifest => "MALFORMED_MANIFEST",
            ValidationKind::MissingAsset => "MISSING_ASSET",
            ValidationKind::MissingEntrypoint => "MISSING_ENTRYPOINT",
            ValidationKind::UninitializedField => "UNINITIALIZED_FIELD",
        }
    }
}

impl std::fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// A field declaration: optional modifiers, a non-nullable type (named
// types plus the lowercase builtins), an identifier, and nothing after
// the semicolon. Initialized declarations fail the `;$` anchor.
static FIELD_DECL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:static\s+)?(?:final\s+|const\s+)?((?:int|double|bool|num|[A-Z][A-Za-z0-9_]*)(?:<[^;=()]*>)?\??)\s+[a-z_][A-Za-z0-9_]*\s*;\s*$",
    )
    .unwrap()
});

/// Runs all checks against a recovered file set.
pub fn validate(files: &FileSet) -> Result<(), ValidationError> {
    check_leaked_markup(files)?;
    let manifest = parse_manifest(files.manifest())?;
    check_declared_assets(files, &manifest)?;
    check_entrypoint(files.main_source())?;
    check_field_initialization(files.main_source())?;
    Ok(())
}

/// No file may still contain fence lines or `FILENAME:` markers; their
/// presence means extraction mis-split the model output.
fn check_leaked_markup(files: &FileSet) -> Result<(), ValidationError> {
    for (path, content) in files.entries() {
        for (idx, line) in content.lines().enumerate() {
            if line.trim_start().starts_with("```") || is_filename_marker(line) {
                return Err(ValidationError::LeakedMarkup { file: path, line: idx + 1 });
            }
        }
    }
    Ok(())
}

fn parse_manifest(manifest: &str) -> Result<serde_yaml::Value, ValidationError> {
    serde_yaml::from_str(manifest).map_err(|source| ValidationError::MalformedManifest { source })
}

/// Every asset the manifest declares must exist in the file set. A
/// declaration ending in `/` covers a directory and matches by prefix.
fn check_declared_assets(
    files: &FileSet,
    manifest: &serde_yaml::Value,
) -> Result<(), ValidationError> {
    for declared in declared_assets(manifest) {
        let present = if declared.ends_with('/') {
            files.has_asset_under(&declared)
        } else {
            files.has_asset(&declared)
        };
        if !present {
            return Err(ValidationError::MissingAsset { path: declared });
        }
    }
    Ok(())
}

fn declared_assets(manifest: &serde_yaml::Value) -> Vec<String> {
    manifest
        .get("flutter")
        .and_then(|flutter| flutter.get("assets"))
        .and_then(|assets| assets.as_sequence())
        .map(|seq| {
            seq.iter()
                .filter_map(|entry| entry.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn check_entrypoint(main_source: &str) -> Result<(), ValidationError> {
    if main_source.contains(ENTRYPOINT_MARKER) {
        Ok(())
    } else {
        Err(ValidationError::MissingEntrypoint)
    }
}

/// Flags non-nullable field declarations with no initializer. Lines with
/// a nullable type, an initializer, `late`, or `required` pass, as do
/// `//` comments. The scan is purely line based, so it cannot tell a
/// class field from a local declaration and does not track `/* */`
/// comment state; both under- and over-reporting are possible.
fn check_field_initialization(main_source: &str) -> Result<(), ValidationError> {
    for (idx, line) in main_source.lines().enumerate() {
        if let Some(declaration) = uninitialized_field(line) {
            return Err(ValidationError::UninitializedField {
                line: idx + 1,
                declaration: declaration.to_string(),
            });
        }
    }
    Ok(())
}

fn uninitialized_field(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.starts_with("//") || trimmed.starts_with("late ") || trimmed.contains("required") {
        return None;
    }
    let cap = FIELD_DECL_REGEX.captures(line)?;
    let field_type = cap.get(1)?.as_str();
    if field_type.ends_with('?') {
        return None;
    }
    Some(trimmed)
}

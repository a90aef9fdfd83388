//! Typed error hierarchy for the generation pipeline.
//!
//! One enum per pipeline stage, plus `PipelineError` which tags a failed
//! run with its stage and the context gathered before the failure:
//! - `ModelError` — chat completion request failures
//! - `ExtractionError` — incomplete file recovery from model output
//! - `ValidationError` — structural checks on recovered files
//! - `PublishError` — git working copy and push failures
//! - `TriggerError` — build service trigger and status sampling failures
//! - `ResolveError` — artifact lookup and download URL signing failures

use thiserror::Error;

use crate::build::{BuildJob, BuildStatus};
use crate::fileset::{FileRole, FileSetBuilder};
use crate::validate::ValidationKind;

/// Errors from the chat model endpoint.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Model request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Model endpoint returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Model response carried no text content")]
    EmptyResponse,

    #[error("Model declined the request: {0}")]
    Refusal(String),
}

/// Raised when model output does not yield a complete file set.
///
/// Carries the partially recovered builder so callers can substitute
/// defaults for an individual missing file without rescanning the output.
#[derive(Debug, Error)]
#[error("Generated output is missing {}", format_missing(.missing))]
pub struct ExtractionError {
    missing: Vec<FileRole>,
    recovered: FileSetBuilder,
}

impl ExtractionError {
    pub(crate) fn incomplete(missing: Vec<FileRole>, recovered: FileSetBuilder) -> Self {
        Self { missing, recovered }
    }

    pub fn missing(&self) -> &[FileRole] {
        &self.missing
    }

    /// True when the manifest is the only file that failed to extract.
    pub fn missing_only_manifest(&self) -> bool {
        self.missing == [FileRole::Manifest]
    }

    /// The files that were recovered before extraction gave up.
    pub fn into_recovered(self) -> FileSetBuilder {
        self.recovered
    }
}

fn format_missing(missing: &[FileRole]) -> String {
    missing
        .iter()
        .map(FileRole::file_name)
        .collect::<Vec<_>>()
        .join(" and ")
}

/// Structural validation failures on a recovered file set.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{file} still contains generation markup at line {line}")]
    LeakedMarkup { file: String, line: usize },

    #[error("Manifest is not valid YAML: {source}")]
    MalformedManifest {
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Manifest declares asset {path} but no such file was generated")]
    MissingAsset { path: String },

    #[error("Entry point does not define `void main(`")]
    MissingEntrypoint,

    #[error("Possibly uninitialized non-nullable field at line {line}: `{declaration}`")]
    UninitializedField { line: usize, declaration: String },
}

impl ValidationError {
    /// Which of the five checks rejected the file set.
    pub fn kind(&self) -> ValidationKind {
        match self {
            ValidationError::LeakedMarkup { .. } => ValidationKind::LeakedMarkup,
            ValidationError::MalformedManifest { .. } => ValidationKind::MalformedManifest,
            ValidationError::MissingAsset { .. } => ValidationKind::MissingAsset,
            ValidationError::MissingEntrypoint => ValidationKind::MissingEntrypoint,
            ValidationError::UninitializedField { .. } => ValidationKind::UninitializedField,
        }
    }
}

/// Errors while materializing and pushing a generated working copy.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to create working directory: {0}")]
    Workdir(#[source] std::io::Error),

    #[error("Failed to clone {url}: {source}")]
    Clone {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("Failed to write {path}: {source}")]
    WriteFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to push branch {branch}: {source}")]
    Push {
        branch: String,
        #[source]
        source: git2::Error,
    },

    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the remote build service (trigger and status sampling).
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Build service request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Build service returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Trigger response carried no build id")]
    MissingBuildId,

    #[error("Build {id} reported unrecognized status {status:?}")]
    UnexpectedStatus { id: String, status: String },

    #[error("Could not obtain an access token: {0}")]
    Auth(#[source] anyhow::Error),
}

/// Errors while locating a built artifact and minting its download URL.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Artifact requested for build {id} in non-success status {status}")]
    NotSuccessful { id: String, status: BuildStatus },

    #[error("Artifact location {location} is outside bucket {bucket}")]
    UnexpectedBucket { location: String, bucket: String },

    #[error("No artifact found for build {id}")]
    ArtifactNotFound { id: String },

    #[error("Storage request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Storage service returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to sign download URL: {0}")]
    Signing(#[source] anyhow::Error),
}

/// The pipeline stage a run failed in, with the stage's own error attached.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Generation failed: {0}")]
    Model(#[from] ModelError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Build trigger failed after publishing {branch}@{commit}: {source}")]
    Trigger {
        branch: String,
        commit: String,
        #[source]
        source: TriggerError,
    },

    #[error("Build status sampling failed: {0}")]
    Poll(#[source] TriggerError),

    #[error("Build finished with status {status}")]
    BuildFailed { status: BuildStatus },

    #[error("Build did not reach a terminal status within {attempts} samples")]
    BuildTimedOut { attempts: u32 },

    #[error("Artifact resolution failed: {0}")]
    Resolve(#[from] ResolveError),
}

/// A failed pipeline run.
///
/// `generated_code` is filled for every failure past the model stage, and
/// the build fields once a build was triggered, so callers can hand users
/// whatever the run produced before it stopped.
#[derive(Debug, Error)]
#[error("{stage}")]
pub struct PipelineError {
    #[source]
    pub stage: StageError,
    pub generated_code: Option<String>,
    pub build_id: Option<String>,
    pub build_log_url: Option<String>,
}

impl PipelineError {
    pub fn new(stage: impl Into<StageError>) -> Self {
        Self {
            stage: stage.into(),
            generated_code: None,
            build_id: None,
            build_log_url: None,
        }
    }

    pub fn with_generated_code(mut self, code: impl Into<String>) -> Self {
        self.generated_code = Some(code.into());
        self
    }

    pub fn with_build(mut self, job: &BuildJob) -> Self {
        self.build_id = Some(job.id.clone());
        self.build_log_url = job.log_url.clone();
        self
    }
}

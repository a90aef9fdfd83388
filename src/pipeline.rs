//! The prompt-to-APK pipeline.
//!
//! [`PipelineRunner::run`] drives a single prompt through every stage:
//! model generation, file extraction, validation, publishing the snapshot
//! to the generated branch, triggering a build, and in wait mode polling
//! the build to completion and minting the download URL. The run stops at
//! the first failing stage and wraps it in a [`PipelineError`] carrying
//! whatever the run had produced by then.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::build::{BuildJob, BuildService, BuildStatus, PollOutcome, wait_for_build};
use crate::errors::{ExtractionError, PipelineError, PublishError, StageError};
use crate::extract::extract;
use crate::fileset::FileSet;
use crate::model::{ChatMessage, ModelClient};
use crate::publish::{Publisher, RepositoryReference};
use crate::storage::{ArtifactStore, resolve_artifact};
use crate::store::{ConversationStore, JobStore, push_exchange};
use crate::validate::validate;

/// Characters of the prompt kept in the commit message subject.
const COMMIT_PROMPT_CHARS: usize = 100;

/// Manifest published when the model omitted `pubspec.yaml`.
///
/// Declares only the stock Flutter dependencies, which every entry point
/// the model is instructed to produce can build against.
pub const DEFAULT_MANIFEST: &str = "\
name: appforge_generated_app
description: A generated Flutter application.
publish_to: 'none'
version: 1.0.0+1

environment:
  sdk: '>=2.19.0 <4.0.0'

dependencies:
  flutter:
    sdk: flutter
  cupertino_icons: ^1.0.2

dev_dependencies:
  flutter_test:
    sdk: flutter
  flutter_lints: ^2.0.0

flutter:
  uses-material-design: true
";

/// Knobs the runner needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bucket the build uploads artifacts to.
    pub bucket: String,
    /// Object prefix searched when a build did not report its artifact.
    pub artifact_prefix: String,
    /// Delay before each status sample in wait mode.
    pub poll_interval: Duration,
    /// Status samples taken before the run gives up on a build.
    pub poll_max_attempts: u32,
}

/// A pipeline run that got at least as far as triggering a build.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// Wait mode: the build succeeded and the download URL is minted.
    Completed {
        job: BuildJob,
        download_url: String,
        generated_code: String,
    },
    /// No-wait mode: the build was triggered and left running.
    Pending { job: BuildJob, generated_code: String },
}

impl PipelineOutcome {
    pub fn job(&self) -> &BuildJob {
        match self {
            PipelineOutcome::Completed { job, .. } | PipelineOutcome::Pending { job, .. } => job,
        }
    }

    pub fn generated_code(&self) -> &str {
        match self {
            PipelineOutcome::Completed { generated_code, .. }
            | PipelineOutcome::Pending { generated_code, .. } => generated_code,
        }
    }

    /// The response body shared by the HTTP API and the CLI.
    ///
    /// `build_log_url` is only inserted when the build has one, so callers
    /// never see a null field.
    pub fn to_response(&self) -> Value {
        let (status, job) = match self {
            PipelineOutcome::Completed { job, .. } => ("success", job),
            PipelineOutcome::Pending { job, .. } => ("pending", job),
        };
        let mut payload = json!({
            "status": status,
            "build_id": job.id,
        });
        if let PipelineOutcome::Completed { download_url, .. } = self {
            payload["apk_download_url"] = json!(download_url);
        }
        if let Some(log_url) = &job.log_url {
            payload["build_log_url"] = json!(log_url);
        }
        payload
    }
}

/// Drives prompts through the full pipeline.
///
/// The runner itself is stateless; conversations and build records live in
/// the shared stores, so one runner serves every caller.
pub struct PipelineRunner {
    pub model: Arc<dyn ModelClient>,
    pub builds: Arc<dyn BuildService>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub publisher: Publisher,
    pub conversations: Arc<ConversationStore>,
    pub jobs: Arc<JobStore>,
    pub config: PipelineConfig,
}

impl PipelineRunner {
    /// Runs one prompt through the pipeline.
    ///
    /// `conversation` keys the chat history. With `wait` unset the run
    /// returns right after the trigger and the build keeps going on its
    /// own; callers learn the outcome from the job store.
    pub async fn run(
        &self,
        conversation: &str,
        prompt: &str,
        wait: bool,
    ) -> Result<PipelineOutcome, PipelineError> {
        let reply = self.generate_reply(conversation, prompt).await?;

        let files = self.recover_files(&reply)?;
        validate(&files).map_err(|err| PipelineError::new(err).with_generated_code(reply.clone()))?;

        let reference = self.publish_snapshot(&files, prompt, &reply).await?;
        info!(branch = %reference.branch, commit = %reference.commit, "snapshot published");

        let job = self.builds.trigger(&reference).await.map_err(|source| {
            PipelineError::new(StageError::Trigger {
                branch: reference.branch.clone(),
                commit: reference.commit.clone(),
                source,
            })
            .with_generated_code(reply.clone())
        })?;
        info!(build = %job.id, status = %job.status, "build triggered");
        self.jobs.insert(job.clone()).await;

        if !wait {
            return Ok(PipelineOutcome::Pending {
                job,
                generated_code: reply,
            });
        }
        self.finish_build(job, reply).await
    }

    /// Sends the conversation plus the new prompt to the model and records
    /// the exchange on success.
    ///
    /// The history lock is held across the model call, so concurrent
    /// prompts on one conversation see each other's exchanges in order.
    async fn generate_reply(
        &self,
        conversation: &str,
        prompt: &str,
    ) -> Result<String, PipelineError> {
        let history = self.conversations.history(conversation).await;
        let mut history = history.lock().await;

        let mut messages = history.clone();
        messages.push(ChatMessage::user(prompt));

        debug!(
            conversation,
            turns = messages.len(),
            model = self.model.name(),
            "requesting generation"
        );
        let reply = self.model.generate(&messages).await.map_err(PipelineError::new)?;
        push_exchange(&mut history, prompt, &reply);
        Ok(reply)
    }

    /// Extracts the file set, substituting [`DEFAULT_MANIFEST`] when the
    /// manifest is the only missing piece. A missing entry point is always
    /// fatal.
    fn recover_files(&self, reply: &str) -> Result<FileSet, PipelineError> {
        let fail =
            |err: ExtractionError| PipelineError::new(err).with_generated_code(reply.to_string());
        match extract(reply) {
            Ok(extraction) => {
                if !extraction.commentary.is_empty() {
                    debug!(commentary = %extraction.commentary, "model commentary outside code blocks");
                }
                if !extraction.dropped.is_empty() {
                    warn!(dropped = ?extraction.dropped, "ignoring unrecognized generated files");
                }
                Ok(extraction.files)
            }
            Err(err) if err.missing_only_manifest() => {
                info!("generated output had no manifest, substituting the default");
                let mut recovered = err.into_recovered();
                recovered.set_manifest(DEFAULT_MANIFEST);
                recovered.build().map_err(fail)
            }
            Err(err) => Err(fail(err)),
        }
    }

    /// Publishes the snapshot off the async runtime; git2 does blocking
    /// network and filesystem work.
    async fn publish_snapshot(
        &self,
        files: &FileSet,
        prompt: &str,
        reply: &str,
    ) -> Result<RepositoryReference, PipelineError> {
        let publisher = self.publisher.clone();
        let snapshot = files.clone();
        let message = commit_message(prompt);
        tokio::task::spawn_blocking(move || publisher.publish(&snapshot, &message))
            .await
            .map_err(|join| PublishError::Other(join.into()))
            .and_then(|published| published)
            .map_err(|err| PipelineError::new(err).with_generated_code(reply.to_string()))
    }

    /// Polls a triggered build to its end and resolves the artifact.
    async fn finish_build(
        &self,
        job: BuildJob,
        reply: String,
    ) -> Result<PipelineOutcome, PipelineError> {
        let outcome = wait_for_build(
            self.builds.as_ref(),
            &job.id,
            self.config.poll_interval,
            self.config.poll_max_attempts,
        )
        .await
        .map_err(|err| {
            PipelineError::new(StageError::Poll(err))
                .with_generated_code(reply.clone())
                .with_build(&job)
        })?;

        let finished = match outcome {
            PollOutcome::Finished(finished) => finished,
            PollOutcome::TimedOut { job: last, attempts } => {
                self.jobs.upsert(last.clone()).await;
                return Err(PipelineError::new(StageError::BuildTimedOut { attempts })
                    .with_generated_code(reply)
                    .with_build(&last));
            }
        };
        self.jobs.upsert(finished.clone()).await;

        if finished.status != BuildStatus::Success {
            return Err(
                PipelineError::new(StageError::BuildFailed { status: finished.status })
                    .with_generated_code(reply)
                    .with_build(&finished),
            );
        }

        let download_url = resolve_artifact(
            self.artifacts.as_ref(),
            &self.config.bucket,
            &self.config.artifact_prefix,
            &finished,
        )
        .await
        .map_err(|err| {
            PipelineError::new(err)
                .with_generated_code(reply.clone())
                .with_build(&finished)
        })?;
        self.jobs.set_artifact_url(&finished.id, &download_url).await;
        info!(build = %finished.id, "artifact URL minted");

        Ok(PipelineOutcome::Completed {
            job: finished,
            download_url,
            generated_code: reply,
        })
    }
}

/// Commit message for a published snapshot. Long prompts are cut at
/// [`COMMIT_PROMPT_CHARS`] characters.
fn commit_message(prompt: &str) -> String {
    let summary: String = prompt.chars().take(COMMIT_PROMPT_CHARS).collect();
    format!("AI generated app for prompt: {summary}")
}

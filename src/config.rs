//! Environment-driven service configuration.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-20250219";
pub const DEFAULT_BRANCH: &str = "generated-app";
pub const DEFAULT_ARTIFACT_PREFIX: &str = "appforge-builds/";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 20;
const DEFAULT_SIGNED_URL_EXPIRY_SECS: u64 = 3600;
const DEFAULT_PORT: u16 = 8080;

/// Everything the service reads from the environment.
///
/// [`Config::from_env`] checks all required variables before failing, so
/// one run reports every gap instead of the first one found.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub model_api_url: String,
    pub model_name: String,
    /// Overrides the built-in generation system prompt.
    pub system_prompt: Option<String>,
    pub github_pat: String,
    pub github_repo_url: String,
    pub generated_branch: String,
    pub gcp_project_id: String,
    pub gcs_bucket_name: String,
    pub artifact_prefix: String,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
    pub signed_url_expiry_secs: u64,
    /// Whether generate requests block until the build finishes.
    pub wait_for_build: bool,
    pub port: u16,
    /// Static OAuth token; when unset, tokens come from the metadata server.
    pub google_access_token: Option<String>,
    /// Service account that signs download URLs; when unset, taken from
    /// the metadata server.
    pub gcp_service_account_email: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut missing = Vec::new();
        let mut required = |name: &'static str| match env_var(name) {
            Some(value) => value,
            None => {
                missing.push(name);
                String::new()
            }
        };

        let anthropic_api_key = required("ANTHROPIC_API_KEY");
        let model_api_url = required("MODEL_API_URL");
        let github_pat = required("GITHUB_PAT");
        let github_repo_url = required("GITHUB_REPO_URL");
        let gcp_project_id = required("GCP_PROJECT_ID");
        let gcs_bucket_name = required("GCS_BUCKET_NAME");

        if !missing.is_empty() {
            bail!("Missing required environment variables: {}", missing.join(", "));
        }

        Ok(Self {
            anthropic_api_key,
            model_api_url,
            model_name: env_var("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            system_prompt: env_var("SYSTEM_PROMPT"),
            github_pat,
            github_repo_url,
            generated_branch: env_var("GENERATED_BRANCH")
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            gcp_project_id,
            gcs_bucket_name,
            artifact_prefix: env_var("ARTIFACT_PREFIX")
                .unwrap_or_else(|| DEFAULT_ARTIFACT_PREFIX.to_string()),
            poll_interval_secs: parsed_var("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?,
            poll_max_attempts: parsed_var("POLL_MAX_ATTEMPTS", DEFAULT_POLL_MAX_ATTEMPTS)?,
            signed_url_expiry_secs: parsed_var(
                "SIGNED_URL_EXPIRY_SECS",
                DEFAULT_SIGNED_URL_EXPIRY_SECS,
            )?,
            wait_for_build: env_var("WAIT_FOR_BUILD").map(|v| v != "false").unwrap_or(true),
            port: parsed_var("PORT", DEFAULT_PORT)?,
            google_access_token: env_var("GOOGLE_ACCESS_TOKEN"),
            gcp_service_account_email: env_var("GCP_SERVICE_ACCOUNT_EMAIL"),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Reads a variable, treating blank values as unset.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_var(name) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid value for {name}: {raw}")),
        None => Ok(default),
    }
}

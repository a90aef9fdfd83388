//! Server assembly and lifecycle.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::api::{self, AppState};
use crate::auth::AccessTokenProvider;
use crate::build::{CloudBuildClient, mirror_repo_name};
use crate::config::Config;
use crate::model::AnthropicClient;
use crate::pipeline::{PipelineConfig, PipelineRunner};
use crate::publish::{Publisher, RepoLocation};
use crate::storage::GcsClient;
use crate::store::{ConversationStore, JobStore};

/// Knobs for the HTTP listener.
pub struct ServerConfig {
    pub port: u16,
    /// Permissive CORS for local frontend development.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080, dev_mode: false }
    }
}

/// Wires the pipeline and its backends from service configuration.
pub fn build_state(config: &Config) -> Result<Arc<AppState>> {
    let model = AnthropicClient::new(
        &config.model_api_url,
        &config.anthropic_api_key,
        &config.model_name,
        config.system_prompt.clone(),
    )?;

    let auth = Arc::new(AccessTokenProvider::new(
        config.google_access_token.clone(),
        config.gcp_service_account_email.clone(),
    ));

    let repo_name = mirror_repo_name(&config.github_repo_url).with_context(|| {
        format!(
            "GITHUB_REPO_URL is not a GitHub repository URL: {}",
            config.github_repo_url
        )
    })?;
    let builds = CloudBuildClient::new(Arc::clone(&auth), &config.gcp_project_id, repo_name);
    let artifacts = GcsClient::new(
        Arc::clone(&auth),
        &config.gcs_bucket_name,
        config.signed_url_expiry_secs,
    );

    let publisher = Publisher::new(RepoLocation {
        url: config.github_repo_url.clone(),
        token: Some(config.github_pat.clone()),
        branch: config.generated_branch.clone(),
        shallow: true,
    });

    let runner = PipelineRunner {
        model: Arc::new(model),
        builds: Arc::new(builds),
        artifacts: Arc::new(artifacts),
        publisher,
        conversations: Arc::new(ConversationStore::new()),
        jobs: Arc::new(JobStore::new()),
        config: PipelineConfig {
            bucket: config.gcs_bucket_name.clone(),
            artifact_prefix: config.artifact_prefix.clone(),
            poll_interval: config.poll_interval(),
            poll_max_attempts: config.poll_max_attempts,
        },
    };

    Ok(Arc::new(AppState {
        runner,
        wait_for_build: config.wait_for_build,
    }))
}

/// The full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router().with_state(state)
}

/// Binds and runs the server until Ctrl+C.
pub async fn start_server(config: Config, server: ServerConfig) -> Result<()> {
    let state = build_state(&config)?;
    let mut app = build_router(state);

    if server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("0.0.0.0:{}", server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    let local_addr = listener.local_addr()?;
    println!("appforge listening on http://{local_addr}");
    println!("  model:  {}", config.model_name);
    println!("  branch: {}", config.generated_branch);
    println!("  bucket: {}", config.gcs_bucket_name);
    info!(%local_addr, "server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_config() -> Config {
        Config {
            anthropic_api_key: "sk-test".to_string(),
            model_api_url: "https://model.example/v1/messages".to_string(),
            model_name: "claude-test".to_string(),
            system_prompt: None,
            github_pat: "ghp_test".to_string(),
            github_repo_url: "https://github.com/demo/apps".to_string(),
            generated_branch: "generated-app".to_string(),
            gcp_project_id: "demo-project".to_string(),
            gcs_bucket_name: "demo-artifacts".to_string(),
            artifact_prefix: "appforge-builds/".to_string(),
            poll_interval_secs: 1,
            poll_max_attempts: 2,
            signed_url_expiry_secs: 60,
            wait_for_build: true,
            port: 8080,
            google_access_token: Some("ya29.token".to_string()),
            gcp_service_account_email: Some("svc@demo.iam.gserviceaccount.com".to_string()),
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert!(!config.dev_mode);
    }

    #[tokio::test]
    async fn test_build_state_wires_full_router() {
        let state = build_state(&test_config()).unwrap();
        assert!(state.wait_for_build);
        assert_eq!(state.runner.config.bucket, "demo-artifacts");

        let app = build_router(state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_build_status_mounted() {
        let app = build_router(build_state(&test_config()).unwrap());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/builds/absent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_build_state_rejects_non_github_repo_url() {
        let mut config = test_config();
        config.github_repo_url = "https://gitlab.example/demo/apps".to_string();

        let err = build_state(&config).unwrap_err();
        assert!(err.to_string().contains("GITHUB_REPO_URL"));
    }
}

//! Google Cloud credentials for the build and storage clients.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const METADATA_EMAIL_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/email";

/// Tokens are treated as expired this many seconds early so a token
/// handed to a caller stays valid for the whole request it signs.
const EXPIRY_SKEW_SECS: u64 = 60;

/// Response from the metadata server's token endpoint.
#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// How long a freshly fetched token may be served from cache.
fn cache_deadline(expires_in: u64) -> Duration {
    Duration::from_secs(expires_in.saturating_sub(EXPIRY_SKEW_SECS))
}

/// Hands out Google Cloud access tokens. A statically configured token
/// wins; otherwise tokens come from the GCE metadata server and are
/// cached until shortly before expiry.
pub struct AccessTokenProvider {
    http: reqwest::Client,
    static_token: Option<String>,
    signer_email: Option<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl AccessTokenProvider {
    pub fn new(static_token: Option<String>, signer_email: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            static_token,
            signer_email,
            cached: Mutex::new(None),
        }
    }

    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        // The lock is held across the refresh so concurrent callers
        // share one metadata request instead of racing.
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if entry.expires_at > Instant::now() {
                return Ok(entry.token.clone());
            }
        }

        let fresh = self.fetch_metadata_token().await?;
        let token = fresh.access_token.clone();
        *cached = Some(CachedToken {
            token: fresh.access_token,
            expires_at: Instant::now() + cache_deadline(fresh.expires_in),
        });
        Ok(token)
    }

    /// Service account that signs V4 download URLs.
    pub async fn signer_email(&self) -> Result<String> {
        if let Some(email) = &self.signer_email {
            return Ok(email.clone());
        }
        self.http
            .get(METADATA_EMAIL_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("Failed to send email request to metadata server")?
            .error_for_status()
            .context("Metadata server email endpoint returned error status")?
            .text()
            .await
            .context("Failed to read email response from metadata server")
    }

    async fn fetch_metadata_token(&self) -> Result<MetadataToken> {
        debug!("fetching access token from metadata server");
        self.http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("Failed to send token request to metadata server")?
            .error_for_status()
            .context("Metadata server token endpoint returned error status")?
            .json::<MetadataToken>()
            .await
            .context("Failed to parse token response from metadata server")
    }
}

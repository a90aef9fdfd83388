//! Artifact bucket access: object listing and V4 signed download URLs.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::auth::AccessTokenProvider;
use crate::build::{BuildJob, BuildStatus};
use crate::errors::ResolveError;

const STORAGE_URL: &str = "https://storage.googleapis.com";
const IAM_CREDENTIALS_URL: &str = "https://iamcredentials.googleapis.com/v1";

/// A `gs://bucket/object` URI split into its halves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GsUri {
    pub bucket: String,
    pub object: String,
}

impl GsUri {
    /// Parses a gs URI. Requires both a bucket and a non-empty object path.
    pub fn parse(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix("gs://")?;
        let (bucket, object) = rest.split_once('/')?;
        if bucket.is_empty() || object.is_empty() {
            return None;
        }
        Some(Self {
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }
}

/// An object listed from the artifact bucket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoredObject {
    pub name: String,
    pub updated: DateTime<Utc>,
}

/// Storage backend holding built artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Lists every object under a prefix.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<StoredObject>, ResolveError>;

    /// Mints a time-limited download URL for an object.
    async fn signed_url(&self, object: &str) -> Result<String, ResolveError>;
}

/// Finds the APK a successful build produced and mints its download URL.
///
/// The location the build reported is authoritative when present: it must
/// parse and sit in the configured bucket, with no listing fallback on a
/// mismatch. Builds that never reported a location fall back to the newest
/// APK under the artifact prefix.
pub async fn resolve_artifact(
    store: &dyn ArtifactStore,
    bucket: &str,
    prefix: &str,
    job: &BuildJob,
) -> Result<String, ResolveError> {
    if job.status != BuildStatus::Success {
        return Err(ResolveError::NotSuccessful {
            id: job.id.clone(),
            status: job.status,
        });
    }

    if let Some(location) = &job.artifact_location {
        let uri = GsUri::parse(location).ok_or_else(|| ResolveError::UnexpectedBucket {
            location: location.clone(),
            bucket: bucket.to_string(),
        })?;
        if uri.bucket != bucket {
            return Err(ResolveError::UnexpectedBucket {
                location: location.clone(),
                bucket: bucket.to_string(),
            });
        }
        return store.signed_url(&uri.object).await;
    }

    debug!(build = %job.id, prefix, "no reported artifact location, listing bucket");
    let mut objects = store.list_objects(prefix).await?;
    objects.retain(|object| object.name.ends_with(".apk"));
    objects.sort_by_key(|object| object.updated);
    match objects.pop() {
        Some(newest) => store.signed_url(&newest.name).await,
        None => Err(ResolveError::ArtifactNotFound { id: job.id.clone() }),
    }
}

/// RFC 3986 encoding with only unreserved characters left bare.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Encodes each object path segment, keeping the separators.
fn percent_encode_path(object: &str) -> String {
    object.split('/').map(percent_encode).collect::<Vec<_>>().join("/")
}

/// Everything about a V4 signature except the signature itself.
struct SigningRequest {
    /// Resource path with each object segment percent-encoded.
    path: String,
    /// Canonical query string, already in sorted order.
    query: String,
    string_to_sign: String,
}

/// Assembles the goog4 canonical request and string-to-sign for a GET of
/// one object, with `host` as the only signed header.
fn build_v4_signing_request(
    bucket: &str,
    object: &str,
    signer: &str,
    now: DateTime<Utc>,
    expiry_secs: u64,
) -> SigningRequest {
    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let datestamp = now.format("%Y%m%d").to_string();
    let scope = format!("{datestamp}/auto/storage/goog4_request");
    let credential = format!("{signer}/{scope}");

    let path = format!("/{bucket}/{}", percent_encode_path(object));
    let query = format!(
        "X-Goog-Algorithm=GOOG4-RSA-SHA256\
         &X-Goog-Credential={}\
         &X-Goog-Date={timestamp}\
         &X-Goog-Expires={expiry_secs}\
         &X-Goog-SignedHeaders=host",
        percent_encode(&credential)
    );

    let canonical_request =
        format!("GET\n{path}\n{query}\nhost:storage.googleapis.com\n\nhost\nUNSIGNED-PAYLOAD");
    let hashed = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    let string_to_sign = format!("GOOG4-RSA-SHA256\n{timestamp}\n{scope}\n{hashed}");

    SigningRequest { path, query, string_to_sign }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<StoredObject>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignBlobResponse {
    signed_blob: String,
}

/// Cloud Storage client. Signs download URLs through the IAM
/// credentials API so no private key ships with the service.
pub struct GcsClient {
    http: reqwest::Client,
    auth: Arc<AccessTokenProvider>,
    bucket: String,
    expiry_secs: u64,
}

impl GcsClient {
    pub fn new(auth: Arc<AccessTokenProvider>, bucket: impl Into<String>, expiry_secs: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth,
            bucket: bucket.into(),
            expiry_secs,
        }
    }

    async fn sign_blob(&self, signer: &str, payload: &str) -> Result<Vec<u8>, ResolveError> {
        let token = self.auth.access_token().await.map_err(ResolveError::Signing)?;
        let url = format!("{IAM_CREDENTIALS_URL}/projects/-/serviceAccounts/{signer}:signBlob");
        let body = serde_json::json!({ "payload": BASE64.encode(payload.as_bytes()) });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(ResolveError::Request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResolveError::Api { status: status.as_u16(), body });
        }

        let parsed: SignBlobResponse = response.json().await.map_err(ResolveError::Request)?;
        BASE64
            .decode(parsed.signed_blob)
            .map_err(|e| ResolveError::Signing(e.into()))
    }
}

#[async_trait]
impl ArtifactStore for GcsClient {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<StoredObject>, ResolveError> {
        let token = self.auth.access_token().await.map_err(ResolveError::Signing)?;
        let url = format!("{STORAGE_URL}/storage/v1/b/{}/o", self.bucket);

        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("prefix", prefix.to_string())];
            if let Some(next) = &page_token {
                query.push(("pageToken", next.clone()));
            }

            let response = self
                .http
                .get(&url)
                .bearer_auth(&token)
                .query(&query)
                .send()
                .await
                .map_err(ResolveError::Request)?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ResolveError::Api { status: status.as_u16(), body });
            }

            let page: ObjectList = response.json().await.map_err(ResolveError::Request)?;
            objects.extend(page.items);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(objects)
    }

    async fn signed_url(&self, object: &str) -> Result<String, ResolveError> {
        let signer = self.auth.signer_email().await.map_err(ResolveError::Signing)?;
        let request =
            build_v4_signing_request(&self.bucket, object, &signer, Utc::now(), self.expiry_secs);
        let signature = self.sign_blob(&signer, &request.string_to_sign).await?;
        Ok(format!(
            "{STORAGE_URL}{}?{}&X-Goog-Signature={}",
            request.path,
            request.query,
            hex::encode(signature)
        ))
    }
}

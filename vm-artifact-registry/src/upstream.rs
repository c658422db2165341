use crate::config::MirrorDefinition;
use crate::location::Location;
use crate::{AppError, AppResult};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use regex::Regex;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::fmt;
use std::pin::pin;
use tracing::{debug, info};
use url::Url;

/// Why a single mirror could not serve a path.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MirrorError {
    #[error("mirror answered {0}")]
    Status(StatusCode),

    #[error("mirror answered with disallowed content type {0}")]
    DisallowedContentType(String),

    #[error("artifact of at least {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: u64, max: u64 },

    #[error("request failed: {0}")]
    Transport(String),
}

impl MirrorError {
    /// A plain miss: the mirror is healthy but does not have the path.
    pub fn is_miss(&self) -> bool {
        matches!(
            self,
            MirrorError::Status(StatusCode::NOT_FOUND) | MirrorError::Status(StatusCode::GONE)
        )
    }
}

impl From<reqwest::Error> for MirrorError {
    fn from(error: reqwest::Error) -> Self {
        MirrorError::Transport(error.to_string())
    }
}

/// HTTP client for one configured mirror.
///
/// Every request carries the mirror's credentials and is bounded by its connect
/// and read timeouts. A fetch first probes with `HEAD` and only downloads when the
/// probe looks like a real artifact: a successful status and no HTML content type,
/// which is how many upstreams disguise their error pages.
///
/// # Examples
///
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use url::Url;
/// use vm_artifact_registry::config::MirrorDefinition;
/// use vm_artifact_registry::location::Location;
/// use vm_artifact_registry::upstream::UpstreamClient;
///
/// let central = MirrorDefinition::new(Url::parse("https://repo.maven.apache.org/maven2/")?);
/// let client = UpstreamClient::new(central)?;
///
/// let pom = Location::parse("junit/junit/4.13.2/junit-4.13.2.pom")?;
/// let bytes = client.fetch(&pom, 64 * 1024 * 1024).await?;
/// # Ok(())
/// # }
/// ```
pub struct UpstreamClient {
    client: Client,
    definition: MirrorDefinition,
    base_url: Url,
    allow_pattern: Option<Regex>,
}

impl fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("url", &self.base_url.as_str())
            .field("allow_pattern", &self.definition.allow_pattern)
            .field("store_locally", &self.definition.store_locally)
            .finish()
    }
}

impl UpstreamClient {
    /// Create a client for `definition`.
    ///
    /// # Errors
    ///
    /// Fails when the allow pattern does not compile or the HTTP client cannot be built.
    pub fn new(definition: MirrorDefinition) -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(definition.connect_timeout())
            .read_timeout(definition.read_timeout())
            .user_agent(concat!("artifact-registry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create HTTP client: {e}"))
            })?;

        let allow_pattern = definition
            .allow_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| AppError::BadRequest(format!("Invalid mirror allow pattern: {e}")))?;

        // Url::join drops the last segment unless the base ends with a slash.
        let mut base_url = definition.url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            definition,
            base_url,
            allow_pattern,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn stores_locally(&self) -> bool {
        self.definition.store_locally
    }

    /// Whether this mirror may be asked for `location`.
    pub fn allows(&self, location: &Location) -> bool {
        self.allow_pattern
            .as_ref()
            .map_or(true, |pattern| pattern.is_match(location.as_str()))
    }

    /// Remote URL of `location`.
    pub fn url_for(&self, location: &Location) -> Result<Url, MirrorError> {
        self.base_url
            .join(location.as_str())
            .map_err(|e| MirrorError::Transport(format!("invalid mirror URL: {e}")))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.definition.credentials {
            Some(credentials) => {
                request.basic_auth(&credentials.username, Some(&credentials.password))
            }
            None => request,
        }
    }

    fn check_response(response: &Response, max_size: u64) -> Result<(), MirrorError> {
        if !response.status().is_success() {
            return Err(MirrorError::Status(response.status()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if is_disallowed_content_type(content_type) {
            return Err(MirrorError::DisallowedContentType(content_type.to_string()));
        }

        // A HEAD response has no body, so read the header instead of content_length().
        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());
        if let Some(size) = declared {
            if size > max_size {
                return Err(MirrorError::TooLarge {
                    size,
                    max: max_size,
                });
            }
        }
        Ok(())
    }

    /// Probe and download `location`, refusing bodies larger than `max_size` bytes.
    pub async fn fetch(&self, location: &Location, max_size: u64) -> Result<Bytes, MirrorError> {
        let url = self.url_for(location)?;

        debug!(url = %url, "Probing mirror");
        let probe = self.authorized(self.client.head(url.clone())).send().await?;
        Self::check_response(&probe, max_size)?;

        let response = self.authorized(self.client.get(url.clone())).send().await?;
        Self::check_response(&response, max_size)?;

        // Chunked responses declare no length; stop reading once the limit is passed.
        let mut body = BytesMut::new();
        let mut chunks = pin!(response.bytes_stream());
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let size = (body.len() + chunk.len()) as u64;
            if size > max_size {
                return Err(MirrorError::TooLarge {
                    size,
                    max: max_size,
                });
            }
            body.extend_from_slice(&chunk);
        }
        let bytes = body.freeze();

        info!(url = %url, size = bytes.len(), "Fetched artifact from mirror");
        Ok(bytes)
    }
}

/// HTML bodies are never artifacts; they are error or login pages.
pub fn is_disallowed_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "text/html" || essence == "application/xhtml+xml"
}

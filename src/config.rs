use std::env;
use std::time::Duration;

/// Connection settings for the Calculation Engine API.
///
/// Defaults come from environment variables and can be overridden with the
/// `with_*` methods. The configuration is immutable once handed to
/// [`crate::api::ApiClient::new`].
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub username: String,
    pub password: String,
    /// Static API token. When set, the client skips the credential
    /// exchange at construction time.
    pub token: Option<String>,
    pub protocol: String,
    pub authority: String,
    pub basepath: String,
    /// Maximum number of requests per second the server allows. The
    /// rate-limit retry sleeps `1 / rate_limit` seconds between attempts.
    pub rate_limit: u32,
    /// Per-request timeout. `None` means no timeout, which is the
    /// behavior of the original client.
    pub request_timeout: Option<Duration>,
    /// Cap on rate-limit retries for ordinary calls. `None` retries
    /// forever, which is the behavior of the original client.
    pub retry_limit: Option<usize>,
    /// Cap on rate-limit retries for streaming downloads. Bounded so a
    /// persistently throttled download cannot loop forever.
    pub download_retry_limit: usize,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ApiConfig {
    /// Read configuration from the `CE_*` environment variables, falling
    /// back to the development defaults.
    pub fn from_env() -> Self {
        let token = env_or("CE_API_TOKEN", "");
        Self {
            username: env_or("CE_USERNAME", "admin"),
            password: env_or("CE_PASSWORD", "password"),
            token: if token.is_empty() { None } else { Some(token) },
            protocol: env_or("CE_API_URL_PROTOCOL", "http"),
            authority: env_or("CE_API_URL_AUTHORITY", "localhost:4000"),
            basepath: env_or("CE_API_URL_BASEPATH", "api/v0"),
            rate_limit: env_or("API_RATE_LIMIT_USER", "2").parse().unwrap_or(2),
            request_timeout: None,
            retry_limit: None,
            download_retry_limit: 10,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    pub fn with_basepath(mut self, basepath: impl Into<String>) -> Self {
        self.basepath = basepath.into();
        self
    }

    /// Requests per second. Clamped to at least 1 so the retry delay is
    /// always finite.
    pub fn with_rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit = rate_limit.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_retry_limit(mut self, limit: usize) -> Self {
        self.retry_limit = Some(limit);
        self
    }

    pub fn with_download_retry_limit(mut self, limit: usize) -> Self {
        self.download_retry_limit = limit;
        self
    }

    /// `{protocol}://{authority}`, the base for download URLs.
    pub fn url_base(&self) -> String {
        format!("{}://{}", self.protocol, self.authority)
    }

    /// Delay slept between attempts when the server answers 429.
    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.rate_limit.max(1)))
    }
}

//! Blocking HTTP registry client.
//!
//! Honors `.npmrc` proxy/auth/strict-ssl knobs. The ambient
//! `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY` variables are respected by the
//! underlying client; explicit `.npmrc` proxies take precedence.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use url::Url;

use crate::core::Npmrc;
use crate::error::PantryError;
use crate::registry::{PackageMetadata, RegistryClient};
use crate::util::process::CancelFlag;

/// Default registry when neither pantry.toml nor `.npmrc` names one.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.pantry.dev/";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const FETCH_CHUNK: usize = 64 * 1024;

/// Registry client over blocking HTTP.
pub struct HttpRegistry {
    base: Url,
    client: Client,
    npmrc: Npmrc,
}

impl HttpRegistry {
    /// Build a client for a registry base URL.
    pub fn new(
        base: &str,
        npmrc: &Npmrc,
        timeout: Option<Duration>,
    ) -> Result<Self, PantryError> {
        let base = Url::parse(base).map_err(|e| PantryError::RegistryFetchFailed {
            name: base.to_string(),
            cause: format!("invalid registry URL: {e}"),
        })?;

        let mut builder = Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .user_agent(concat!("pantry/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = &npmrc.https_proxy {
            if let Ok(proxy) = reqwest::Proxy::https(proxy) {
                builder = builder.proxy(proxy);
            }
        }
        if let Some(proxy) = &npmrc.proxy {
            if let Ok(proxy) = reqwest::Proxy::http(proxy) {
                builder = builder.proxy(proxy);
            }
        }
        if !npmrc.strict_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|e| PantryError::NetworkFatal {
            cause: e.to_string(),
        })?;

        Ok(HttpRegistry {
            base,
            client,
            npmrc: npmrc.clone(),
        })
    }

    fn auth_header_for(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        if let Some(token) = self.npmrc.token_for(host) {
            return Some(format!("Bearer {token}"));
        }
        self.npmrc
            .basic_auth
            .get(&format!("//{host}"))
            .map(|credentials| format!("Basic {credentials}"))
    }

    fn get(&self, url: &Url) -> Result<reqwest::blocking::Response, PantryError> {
        let mut request = self.client.get(url.clone());
        if let Some(auth) = self.auth_header_for(url) {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }

        let response = request.send().map_err(classify_transport_error)?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if is_transient_status(status) {
            Err(PantryError::NetworkTransient {
                cause: format!("HTTP {status} from {url}"),
            })
        } else {
            Err(PantryError::NetworkFatal {
                cause: format!("HTTP {status} from {url}"),
            })
        }
    }
}

impl RegistryClient for HttpRegistry {
    fn metadata(&self, name: &str) -> Result<PackageMetadata, PantryError> {
        let url = self
            .base
            .join(name)
            .map_err(|e| PantryError::RegistryFetchFailed {
                name: name.to_string(),
                cause: e.to_string(),
            })?;

        tracing::debug!("fetching metadata for {} from {}", name, url);

        let response = self.get(&url).map_err(|e| PantryError::RegistryFetchFailed {
            name: name.to_string(),
            cause: e.to_string(),
        })?;

        let metadata: PackageMetadata =
            serde_json::from_reader(response).map_err(|e| PantryError::RegistryFetchFailed {
                name: name.to_string(),
                cause: format!("invalid metadata: {e}"),
            })?;

        Ok(metadata.normalize())
    }

    fn fetch(&self, url: &str, cancel: &CancelFlag) -> Result<Vec<u8>, PantryError> {
        let url = Url::parse(url).map_err(|e| PantryError::NetworkFatal {
            cause: format!("invalid URL `{url}`: {e}"),
        })?;

        let mut response = self.get(&url)?;
        let mut bytes = Vec::with_capacity(
            response
                .content_length()
                .map(|l| l as usize)
                .unwrap_or(FETCH_CHUNK),
        );
        let mut chunk = vec![0u8; FETCH_CHUNK];

        // Cancellation is observed between chunks
        loop {
            if cancel.is_cancelled() {
                return Err(PantryError::Cancelled);
            }
            let n = response
                .read(&mut chunk)
                .map_err(|e| PantryError::NetworkTransient {
                    cause: e.to_string(),
                })?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..n]);
        }

        Ok(bytes)
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn classify_transport_error(err: reqwest::Error) -> PantryError {
    if err.is_timeout() || err.is_connect() {
        PantryError::NetworkTransient {
            cause: err.to_string(),
        }
    } else {
        PantryError::NetworkFatal {
            cause: err.to_string(),
        }
    }
}

/// Archive URL for a GitHub source at a given ref.
pub fn github_archive_url(repo: &str, git_ref: Option<&str>) -> String {
    let reference = git_ref.unwrap_or("HEAD");
    format!("https://codeload.github.com/{repo}/tar.gz/{reference}")
}

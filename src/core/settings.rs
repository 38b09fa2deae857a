//! Installer settings and host configuration.
//!
//! Three layers, lowest precedence first: built-in defaults, `.npmrc`
//! (user-wide then project), and the project's `pantry.toml`. Environment
//! variables are read once into [`EnvKnobs`] at startup.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// How dependencies are laid out under an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkerStrategy {
    /// One subtree per package, union linked into `bin/` and `lib/`.
    Isolated,
    /// Shared dependencies hoisted into a flat directory.
    Hoisted,
}

impl Default for LinkerStrategy {
    fn default() -> Self {
        LinkerStrategy::Hoisted
    }
}

/// `[install]` section of pantry.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InstallSettings {
    /// Linker strategy
    pub linker: LinkerStrategy,

    /// Install peer dependencies instead of warning
    pub peer: bool,

    /// Include dev dependencies
    pub dev: bool,

    /// Include optional dependencies
    pub optional: bool,

    /// Production mode (implies no dev dependencies)
    pub production: bool,

    /// Registry URL override
    pub registry: Option<String>,

    /// Fail instead of rewriting an out-of-date lockfile
    pub frozen_lockfile: bool,
}

impl Default for InstallSettings {
    fn default() -> Self {
        InstallSettings {
            linker: LinkerStrategy::default(),
            peer: false,
            dev: true,
            optional: true,
            production: false,
            registry: None,
            frozen_lockfile: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawProjectToml {
    #[serde(default)]
    install: Option<InstallSettings>,
}

impl InstallSettings {
    /// Load from a `pantry.toml`, falling back to defaults when absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let raw: RawProjectToml = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(raw.install.unwrap_or_default())
    }

    /// Whether dev dependencies are included under current settings.
    pub fn include_dev(&self) -> bool {
        self.dev && !self.production
    }
}

/// Parsed `.npmrc` knobs the resolver and downloader honor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Npmrc {
    /// Default registry URL
    pub registry: Option<String>,

    /// `@scope` to registry URL
    pub scoped_registries: BTreeMap<String, String>,

    /// `//host/` to bearer token
    pub auth_tokens: BTreeMap<String, String>,

    /// `//host/` to basic-auth credentials
    pub basic_auth: BTreeMap<String, String>,

    /// Proxy for http requests
    pub proxy: Option<String>,

    /// Proxy for https requests
    pub https_proxy: Option<String>,

    /// Verify TLS certificates (default true)
    pub strict_ssl: bool,
}

impl Npmrc {
    /// Parse `.npmrc` content (INI subset: `key = value` lines, `#`/`;` comments).
    pub fn parse(content: &str) -> Self {
        let mut rc = Npmrc {
            strict_ssl: true,
            ..Default::default()
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "registry" => rc.registry = Some(value.to_string()),
                "proxy" => rc.proxy = Some(value.to_string()),
                "https-proxy" => rc.https_proxy = Some(value.to_string()),
                "strict-ssl" => rc.strict_ssl = value != "false",
                _ => {
                    if let Some(scope) = key.strip_suffix(":registry") {
                        if scope.starts_with('@') {
                            rc.scoped_registries
                                .insert(scope.to_string(), value.to_string());
                        }
                    } else if let Some(host) = key.strip_suffix(":_authToken") {
                        rc.auth_tokens
                            .insert(host.trim_end_matches('/').to_string(), value.to_string());
                    } else if let Some(host) = key.strip_suffix(":_auth") {
                        rc.basic_auth
                            .insert(host.trim_end_matches('/').to_string(), value.to_string());
                    }
                }
            }
        }

        rc
    }

    /// Load and merge user-level then project-level `.npmrc` files.
    /// Project entries win.
    pub fn load(user_path: &Path, project_path: &Path) -> Self {
        let mut merged = Npmrc {
            strict_ssl: true,
            ..Default::default()
        };

        for path in [user_path, project_path] {
            if let Ok(content) = std::fs::read_to_string(path) {
                merged.merge(Npmrc::parse(&content));
            }
        }

        merged
    }

    fn merge(&mut self, other: Npmrc) {
        if other.registry.is_some() {
            self.registry = other.registry;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.https_proxy.is_some() {
            self.https_proxy = other.https_proxy;
        }
        self.strict_ssl = other.strict_ssl;
        self.scoped_registries.extend(other.scoped_registries);
        self.auth_tokens.extend(other.auth_tokens);
        self.basic_auth.extend(other.basic_auth);
    }

    /// The auth token for a registry host, if configured.
    pub fn token_for(&self, host: &str) -> Option<&str> {
        self.auth_tokens
            .get(&format!("//{host}"))
            .or_else(|| self.auth_tokens.get(host))
            .map(String::as_str)
    }
}

/// Environment-variable knobs, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvKnobs {
    /// `PANTRY_OFFLINE=1`: refuse network, consult caches only
    pub offline: bool,

    /// `PANTRY_CACHE_TTL`: environment-cache TTL override in seconds
    pub cache_ttl: Option<u64>,

    /// `PANTRY_NO_CACHE=1`: bypass the environment cache
    pub no_cache: bool,

    /// `PANTRY_MAX_CONCURRENT`: download/install parallelism override
    pub max_concurrent: Option<usize>,

    /// `PANTRY_DOWNLOAD_TIMEOUT`: per-request timeout in milliseconds
    pub download_timeout_ms: Option<u64>,
}

impl EnvKnobs {
    /// Read the knobs from the process environment.
    pub fn from_env() -> Self {
        fn flag(name: &str) -> bool {
            std::env::var(name).is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        }
        fn num<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }

        EnvKnobs {
            offline: flag("PANTRY_OFFLINE"),
            cache_ttl: num("PANTRY_CACHE_TTL"),
            no_cache: flag("PANTRY_NO_CACHE"),
            max_concurrent: num("PANTRY_MAX_CONCURRENT"),
            download_timeout_ms: num("PANTRY_DOWNLOAD_TIMEOUT"),
        }
    }
}

/// Everything the installer needs to know about its surroundings.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub install: InstallSettings,
    pub npmrc: Npmrc,
    pub knobs: EnvKnobs,
}

impl Settings {
    /// Load all configuration layers for a project.
    pub fn load(project_root: &Path) -> Result<Self> {
        let install = InstallSettings::load(&project_root.join("pantry.toml"))?;
        let npmrc = Npmrc::load(
            &crate::util::paths::home_dir().join(".npmrc"),
            &project_root.join(".npmrc"),
        );
        Ok(Settings {
            install,
            npmrc,
            knobs: EnvKnobs::from_env(),
        })
    }

    /// The effective registry URL: pantry.toml wins, then `.npmrc`.
    pub fn registry_url(&self) -> Option<&str> {
        self.install
            .registry
            .as_deref()
            .or(self.npmrc.registry.as_deref())
    }
}

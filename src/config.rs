use anyhow::{Context, Result, bail};
use authentik::ProxyMode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const BUILTIN_CATALOG: &str = include_str!("../config/catalog.toml");

/// Callback paths registered on every OAuth2 provider.
pub const REDIRECT_PATHS: [&str; 4] = [
    "/akprox/callback",
    "/outpost.goauthentik.io/callback",
    "/auth/callback",
    "/oauth/callback",
];

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("akrecon"))
}

// ============================================================================
// API Settings
// ============================================================================

/// Required settings that were not supplied.
#[derive(Debug, thiserror::Error)]
#[error("missing required environment variables: {}", .0.join(", "))]
pub struct MissingSettings(pub Vec<&'static str>);

impl MissingSettings {
    /// Usage text listing what is missing.
    pub fn usage(&self) -> String {
        let mut out = String::from("✗ Missing required environment variables:\n");
        for name in &self.0 {
            out.push_str(&format!("  - {name}\n"));
        }
        out
    }
}

/// Connection settings for the Authentik API
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub host: String,
    pub token: String,
}

impl ApiSettings {
    /// Collect host and token, reporting every missing variable at once.
    pub fn require(
        host: Option<&str>,
        token: Option<&str>,
        token_var: &'static str,
    ) -> Result<Self, MissingSettings> {
        let host = host.map(str::trim).filter(|s| !s.is_empty());
        let token = token.map(str::trim).filter(|s| !s.is_empty());

        match (host, token) {
            (Some(host), Some(token)) => Ok(Self {
                host: host.trim_end_matches('/').to_string(),
                token: token.to_string(),
            }),
            (host, token) => {
                let mut missing = Vec::new();
                if host.is_none() {
                    missing.push("AUTHENTIK_HOST");
                }
                if token.is_none() {
                    missing.push(token_var);
                }
                Err(MissingSettings(missing))
            }
        }
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Declared services and the defaults applied to them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub defaults: ProviderDefaults,
    #[serde(default)]
    pub outpost: OutpostSettings,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderDefaults {
    pub mode: ProxyMode,
    pub cookie_domain: String,
    pub skip_path_regex: String,
    pub internal_host_ssl_validation: bool,
    pub basic_auth_enabled: bool,
    pub authorization_flow_slug: String,
    /// Used when the flow cannot be looked up
    pub fallback_authorization_flow: String,
    pub provider_suffix: String,
    pub policy_engine_mode: String,
}

impl Default for ProviderDefaults {
    fn default() -> Self {
        Self {
            mode: ProxyMode::ForwardSingle,
            cookie_domain: String::new(),
            skip_path_regex: "^/api/.*$".to_string(),
            internal_host_ssl_validation: false,
            basic_auth_enabled: false,
            authorization_flow_slug: "default-authorization-flow".to_string(),
            fallback_authorization_flow: "be0ee023-11fe-4a43-b453-bc67957cafbf".to_string(),
            provider_suffix: "-proxy".to_string(),
            policy_engine_mode: "any".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutpostSettings {
    pub name: String,
    #[serde(rename = "type")]
    pub outpost_type: String,
    /// Outposts whose name contains one of these are never targeted
    pub exclude_name_patterns: Vec<String>,
    pub detach_conflicts: bool,
    /// Merged over the live outpost config
    pub config: Map<String, Value>,
}

impl Default for OutpostSettings {
    fn default() -> Self {
        Self {
            name: "k8s-external-proxy-outpost".to_string(),
            outpost_type: "proxy".to_string(),
            exclude_name_patterns: vec!["embedded".to_string()],
            detach_conflicts: true,
            config: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub external_host: String,
    pub internal_host: String,
    pub internal_port: u16,
    #[serde(default = "default_scheme")]
    pub internal_scheme: String,
    #[serde(default)]
    pub mode: Option<ProxyMode>,
}

fn default_scheme() -> String {
    "http".to_string()
}

impl ServiceConfig {
    pub fn external_url(&self) -> String {
        format!("https://{}", self.external_host)
    }

    pub fn internal_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.internal_scheme, self.internal_host, self.internal_port
        )
    }

    /// OAuth2 redirect URIs for this service, in registration order.
    pub fn redirect_uris(&self) -> Vec<String> {
        let base = self.external_url();
        REDIRECT_PATHS
            .iter()
            .map(|path| format!("{base}{path}"))
            .collect()
    }
}

/// Where a catalog was loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    File(PathBuf),
    Builtin,
}

impl fmt::Display for CatalogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Builtin => f.write_str("built-in catalog"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    Toml,
    Json,
}

impl CatalogFormat {
    /// Detect the format from a file extension; anything but `.json` is TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

impl Catalog {
    /// Load the catalog: explicit path, then the user config file, then the
    /// built-in catalog.
    pub fn load(explicit: Option<&str>) -> Result<(Self, CatalogSource)> {
        if let Some(path) = explicit {
            let path = PathBuf::from(shellexpand::tilde(path).as_ref());
            return Ok((Self::from_file(&path)?, CatalogSource::File(path)));
        }

        if let Ok(dir) = config_dir() {
            let path = dir.join("catalog.toml");
            if path.exists() {
                return Ok((Self::from_file(&path)?, CatalogSource::File(path)));
            }
        }

        Ok((Self::builtin()?, CatalogSource::Builtin))
    }

    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_CATALOG, CatalogFormat::Toml).context("Invalid built-in catalog")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content, CatalogFormat::from_path(path))
            .with_context(|| format!("Invalid catalog {}", path.display()))
    }

    /// Parse and validate catalog text.
    pub fn parse(content: &str, format: CatalogFormat) -> Result<Self> {
        let catalog: Self = match format {
            CatalogFormat::Toml => toml::from_str(content).context("Invalid TOML")?,
            CatalogFormat::Json => serde_json::from_str(content).context("Invalid JSON")?,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            bail!("catalog declares no services");
        }

        regex::Regex::new(&self.defaults.skip_path_regex).with_context(|| {
            format!(
                "skip_path_regex '{}' is not a valid regex",
                self.defaults.skip_path_regex
            )
        })?;

        if self.outpost.name.trim().is_empty() {
            bail!("outpost name is empty");
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                bail!("service with empty name");
            }
            if !seen.insert(service.name.as_str()) {
                bail!("service '{}' is declared more than once", service.name);
            }
            if service.external_host.trim().is_empty() {
                bail!("service '{}' has no external_host", service.name);
            }
            if service.internal_host.trim().is_empty() {
                bail!("service '{}' has no internal_host", service.name);
            }
        }

        Ok(())
    }

    /// Name of the proxy provider declared for a service.
    pub fn provider_name(&self, service: &ServiceConfig) -> String {
        format!("{}{}", service.name, self.defaults.provider_suffix)
    }

    /// Effective mode: CLI override, then the service's own, then the default.
    pub fn mode_for(&self, service: &ServiceConfig, cli_override: Option<ProxyMode>) -> ProxyMode {
        cli_override
            .or(service.mode)
            .unwrap_or(self.defaults.mode)
    }
}

//! Typed records and desired-state payloads for the Authentik API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// API collections this crate reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    ProxyProviders,
    OAuth2Providers,
    Applications,
    Outposts,
    Flows,
    Tokens,
}

impl Collection {
    pub const ALL: [Self; 6] = [
        Self::ProxyProviders,
        Self::OAuth2Providers,
        Self::Applications,
        Self::Outposts,
        Self::Flows,
        Self::Tokens,
    ];

    /// Collection path relative to the API root, with trailing slash.
    pub fn path(&self) -> &'static str {
        match self {
            Self::ProxyProviders => "providers/proxy/",
            Self::OAuth2Providers => "providers/oauth2/",
            Self::Applications => "core/applications/",
            Self::Outposts => "outposts/instances/",
            Self::Flows => "flows/instances/",
            Self::Tokens => "core/tokens/",
        }
    }

    /// Detail path for one record.
    pub fn detail_path(&self, id: &str) -> String {
        format!("{}{}/", self.path(), id)
    }

    /// Field that detail routes are keyed by.
    pub fn lookup_field(&self) -> &'static str {
        match self {
            Self::Applications | Self::Flows => "slug",
            Self::Tokens => "identifier",
            _ => "pk",
        }
    }

    /// Whether the server assigns integer primary keys.
    pub fn numeric_pk(&self) -> bool {
        matches!(self, Self::ProxyProviders | Self::OAuth2Providers)
    }

    /// Human-readable name for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ProxyProviders => "proxy provider",
            Self::OAuth2Providers => "OAuth2 provider",
            Self::Applications => "application",
            Self::Outposts => "outpost",
            Self::Flows => "flow",
            Self::Tokens => "token",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One page of a list response.
#[derive(Debug, Clone, Deserialize)]
pub struct Paginated<T> {
    #[serde(default)]
    pub pagination: Option<Pagination>,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

/// Page cursor. `next` is a page number; 0 means this was the last page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub next: u64,
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub count: u64,
}

/// The authenticated user.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    #[serde(default)]
    pub pk: u64,
    pub username: String,
    #[serde(default)]
    pub name: String,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyProvider {
    pub pk: u64,
    pub name: String,
    #[serde(default)]
    pub external_host: String,
    #[serde(default)]
    pub internal_host: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub authorization_flow: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OAuth2Provider {
    pub pk: u64,
    pub name: String,
    /// Newline-separated string on older servers, a list of objects on newer ones.
    #[serde(default)]
    pub redirect_uris: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Application {
    pub pk: String,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub provider: Option<u64>,
    #[serde(default)]
    pub meta_launch_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Outpost {
    pub pk: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub outpost_type: String,
    #[serde(default)]
    pub providers: Vec<u64>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Outpost {
    /// String setting from the outpost config, if present.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Token {
    pub identifier: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

/// Proxy provider operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    Proxy,
    #[default]
    ForwardSingle,
    ForwardDomain,
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::ForwardSingle => "forward_single",
            Self::ForwardDomain => "forward_domain",
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "proxy" => Ok(Self::Proxy),
            "forward_single" => Ok(Self::ForwardSingle),
            "forward_domain" => Ok(Self::ForwardDomain),
            other => Err(format!(
                "unknown proxy mode '{other}' (expected proxy, forward_single or forward_domain)"
            )),
        }
    }
}

/// Full desired configuration of a proxy provider, sent on create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyProviderSpec {
    pub name: String,
    pub authorization_flow: String,
    pub external_host: String,
    pub internal_host: String,
    pub internal_host_ssl_validation: bool,
    pub mode: ProxyMode,
    pub cookie_domain: String,
    pub skip_path_regex: String,
    pub basic_auth_enabled: bool,
}

/// Full desired configuration of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationSpec {
    pub name: String,
    pub slug: String,
    pub provider: u64,
    pub meta_description: String,
    pub meta_launch_url: String,
    pub policy_engine_mode: String,
}

/// Payload for creating an outpost.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutpostSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub outpost_type: String,
    pub providers: Vec<u64>,
    pub config: Map<String, Value>,
}

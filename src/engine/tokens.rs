//! Outpost token extraction
//!
//! Finds the API token each outpost authenticates with and writes the keys to
//! a result file that later provisioning steps read.

use anyhow::{Context, Result, bail};
use authentik::{Client, Outpost, Token, Transport};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// Outpost to extract a token for, as given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTarget {
    pub outpost_id: String,
    pub expected_name: String,
}

impl FromStr for TokenTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, name) = s
            .split_once('=')
            .ok_or_else(|| format!("expected <outpost id>=<name>, got '{s}'"))?;
        let (id, name) = (id.trim(), name.trim());
        if id.is_empty() || name.is_empty() {
            return Err(format!("expected <outpost id>=<name>, got '{s}'"));
        }
        Ok(Self {
            outpost_id: id.to_string(),
            expected_name: name.to_string(),
        })
    }
}

impl fmt::Display for TokenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.outpost_id, self.expected_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedToken {
    pub outpost_name: String,
    pub expected_name: String,
    pub token: String,
    pub token_identifier: String,
    pub token_description: String,
}

/// Result file contents, keyed by outpost id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub extracted_tokens: BTreeMap<String, ExtractedToken>,
    pub extraction_timestamp: String,
}

impl ExtractionResult {
    pub fn new(extracted_tokens: BTreeMap<String, ExtractedToken>) -> Self {
        Self {
            extracted_tokens,
            extraction_timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Write as pretty JSON, readable by the owner only. The file is created
    /// with mode 0600 and an existing file is restricted before any key is
    /// written.
    pub fn write(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict {}", path.display()))?;
        }

        file.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Token records that belong to an outpost at all
pub fn is_outpost_token(token: &Token) -> bool {
    token.identifier.to_lowercase().contains("outpost")
        || token.description.to_lowercase().contains("outpost")
}

/// Whether `token` names the outpost by id or (case-insensitively) by name.
pub fn matches_outpost(token: &Token, outpost_id: &str, outpost_name: &str) -> bool {
    if token.identifier.contains(outpost_id) || token.description.contains(outpost_id) {
        return true;
    }
    let name = outpost_name.to_lowercase();
    !name.is_empty()
        && (token.identifier.to_lowercase().contains(&name)
            || token.description.to_lowercase().contains(&name))
}

/// Pair each target with its live outpost name. Without explicit targets every
/// outpost not matching `exclude` is a target, expected under its own name.
pub fn select_targets(
    outposts: &[Outpost],
    explicit: &[TokenTarget],
    exclude: &[String],
) -> Vec<(TokenTarget, String)> {
    if explicit.is_empty() {
        return outposts
            .iter()
            .filter(|o| {
                let name = o.name.to_lowercase();
                !exclude.iter().any(|p| name.contains(&p.to_lowercase()))
            })
            .map(|o| {
                let target = TokenTarget {
                    outpost_id: o.pk.clone(),
                    expected_name: o.name.clone(),
                };
                (target, o.name.clone())
            })
            .collect();
    }

    explicit
        .iter()
        .filter_map(|target| {
            match outposts.iter().find(|o| o.pk == target.outpost_id) {
                Some(outpost) => {
                    log::info!(
                        "  → Target outpost found: {} ({})",
                        outpost.name,
                        target.outpost_id
                    );
                    Some((target.clone(), outpost.name.clone()))
                }
                None => {
                    log::warn!("⚠ Target outpost {} does not exist", target.outpost_id);
                    None
                }
            }
        })
        .collect()
}

/// Key prefix safe to show in logs
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(20).collect();
    format!("{prefix}...")
}

pub struct TokenExtractor<'a, T: Transport> {
    client: &'a Client<T>,
    exclude: Vec<String>,
}

impl<'a, T: Transport> TokenExtractor<'a, T> {
    pub fn new(client: &'a Client<T>, exclude: Vec<String>) -> Self {
        Self { client, exclude }
    }

    /// Extract keys for `targets`. Finding none at all is an error.
    pub fn extract(&self, targets: &[TokenTarget]) -> Result<ExtractionResult> {
        let user = self.client.whoami().context("Authentication failed")?;
        log::info!("✓ Authenticated as {user}");

        let outposts = self.client.list_outposts().context("Failed to list outposts")?;
        log::info!("✓ Found {} outposts", outposts.len());
        for outpost in &outposts {
            log::debug!(
                "Outpost: {} (ID: {}, Type: {})",
                outpost.name,
                outpost.pk,
                outpost.outpost_type
            );
        }

        let selected = select_targets(&outposts, targets, &self.exclude);
        if selected.is_empty() {
            bail!("No target outposts found");
        }

        let tokens: Vec<Token> = self
            .client
            .list_tokens()
            .context("Failed to list tokens")?
            .into_iter()
            .filter(is_outpost_token)
            .collect();
        log::info!("✓ Found {} outpost-related tokens", tokens.len());
        if tokens.is_empty() {
            bail!("No outpost tokens found");
        }

        let mut extracted = BTreeMap::new();
        for (target, outpost_name) in selected {
            log::info!("Looking for token for outpost {outpost_name} ({})", target.outpost_id);
            let Some(token) = tokens
                .iter()
                .find(|t| matches_outpost(t, &target.outpost_id, &outpost_name))
            else {
                log::warn!("⚠ No token found for outpost {outpost_name} ({})", target.outpost_id);
                continue;
            };

            let Some(key) = self.key_for(token) else {
                log::warn!("⚠ Found token record but no key for {outpost_name}");
                continue;
            };

            log::info!(
                "✓ Found token for {outpost_name}: {} ({})",
                token.identifier,
                mask_key(&key)
            );
            extracted.insert(
                target.outpost_id,
                ExtractedToken {
                    outpost_name,
                    expected_name: target.expected_name,
                    token: key,
                    token_identifier: token.identifier.clone(),
                    token_description: token.description.clone(),
                },
            );
        }

        if extracted.is_empty() {
            bail!("No tokens extracted");
        }
        Ok(ExtractionResult::new(extracted))
    }

    fn key_for(&self, token: &Token) -> Option<String> {
        if let Some(key) = token.key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        match self.client.view_token_key(&token.identifier) {
            Ok(key) if !key.is_empty() => Some(key),
            Ok(_) => None,
            Err(e) => {
                log::warn!("⚠ Could not read key of token {}: {e}", token.identifier);
                None
            }
        }
    }
}

//! Outpost helpers: container views, target selection, config updates

use crate::config::{Catalog, OutpostSettings};
use crate::engine::payload::outpost_config_update;
use anyhow::{Context, Result};
use authentik::{Client, Outpost, Transport};
use declarative::{ContainerSelector, ContainerView};
use serde::Serialize;
use serde_json::{Map, Value};

pub fn view(outpost: &Outpost) -> ContainerView<String, u64> {
    ContainerView {
        id: outpost.pk.clone(),
        name: outpost.name.clone(),
        kind: outpost.outpost_type.clone(),
        members: outpost.providers.clone(),
    }
}

pub fn selector(settings: &OutpostSettings, name: &str) -> ContainerSelector {
    ContainerSelector::new(&settings.outpost_type)
        .excluding(settings.exclude_name_patterns.iter().cloned())
        .preferring(name)
}

/// PATCH `overlay` merged over the outpost's live config, writing `providers`
/// as its member list.
pub fn apply_config<T: Transport>(
    client: &Client<T>,
    outpost: &Outpost,
    overlay: &Map<String, Value>,
    providers: &[u64],
) -> Result<Outpost> {
    let update = outpost_config_update(outpost, overlay, providers);
    client
        .patch_outpost(&outpost.pk, &update)
        .with_context(|| format!("Failed to update config of outpost {}", outpost.name))
}

/// Look up an outpost by exact name and merge the catalog's config into it.
pub fn update_outpost_config<T: Transport>(
    client: &Client<T>,
    catalog: &Catalog,
    name: &str,
) -> Result<Outpost> {
    let outpost = client
        .find_outposts_by_name(name)
        .context("Failed to look up outpost")?
        .into_iter()
        .find(|o| o.name == name)
        .with_context(|| format!("Outpost '{name}' not found"))?;

    log::info!("Found outpost {} ({})", outpost.name, outpost.pk);
    let updated = apply_config(client, &outpost, &catalog.outpost.config, &outpost.providers)?;
    log::info!(
        "Updated config of {} ({} keys)",
        updated.name,
        updated.config.len()
    );
    Ok(updated)
}

/// One row of the outpost listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutpostSummary {
    pub id: String,
    pub name: String,
    pub outpost_type: String,
    pub providers: Vec<u64>,
    pub authentik_host: Option<String>,
    pub authentik_host_browser: Option<String>,
}

impl From<&Outpost> for OutpostSummary {
    fn from(outpost: &Outpost) -> Self {
        Self {
            id: outpost.pk.clone(),
            name: outpost.name.clone(),
            outpost_type: outpost.outpost_type.clone(),
            providers: outpost.providers.clone(),
            authentik_host: outpost.config_str("authentik_host").map(str::to_string),
            authentik_host_browser: outpost
                .config_str("authentik_host_browser")
                .map(str::to_string),
        }
    }
}

//! Desired-state payloads built from the catalog

use crate::config::{Catalog, OutpostSettings, ServiceConfig};
use authentik::{ApplicationSpec, Outpost, OutpostSpec, ProxyMode, ProxyProviderSpec};
use serde_json::{Map, Value, json};

/// Full proxy provider configuration for a service.
pub fn provider_spec(
    catalog: &Catalog,
    service: &ServiceConfig,
    authorization_flow: &str,
    mode: ProxyMode,
) -> ProxyProviderSpec {
    let defaults = &catalog.defaults;
    ProxyProviderSpec {
        name: catalog.provider_name(service),
        authorization_flow: authorization_flow.to_string(),
        external_host: service.external_url(),
        internal_host: service.internal_url(),
        internal_host_ssl_validation: defaults.internal_host_ssl_validation,
        mode,
        cookie_domain: defaults.cookie_domain.clone(),
        skip_path_regex: defaults.skip_path_regex.clone(),
        basic_auth_enabled: defaults.basic_auth_enabled,
    }
}

/// Full application configuration, bound to `provider`.
pub fn application_spec(
    catalog: &Catalog,
    service: &ServiceConfig,
    provider: u64,
) -> ApplicationSpec {
    ApplicationSpec {
        name: service.name.clone(),
        slug: service.name.clone(),
        provider,
        meta_description: format!("{} service", service.name),
        meta_launch_url: service.external_url(),
        policy_engine_mode: catalog.defaults.policy_engine_mode.clone(),
    }
}

/// New outpost with no members and the declared config.
pub fn outpost_spec(settings: &OutpostSettings, name: &str) -> OutpostSpec {
    OutpostSpec {
        name: name.to_string(),
        outpost_type: settings.outpost_type.clone(),
        providers: Vec::new(),
        config: settings.config.clone(),
    }
}

/// `overlay` merged over `live`, key by key.
pub fn merged_config(
    live: &Map<String, Value>,
    overlay: &Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = live.clone();
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Config update that keeps the outpost's identity and the given members.
pub fn outpost_config_update(
    outpost: &Outpost,
    overlay: &Map<String, Value>,
    providers: &[u64],
) -> Value {
    json!({
        "name": outpost.name,
        "type": outpost.outpost_type,
        "providers": providers,
        "config": merged_config(&outpost.config, overlay),
    })
}

/// Redirect URI patch for an OAuth2 provider, or `None` when `current`
/// already lists exactly `uris`.
///
/// Older servers store a newline-separated string, newer ones a list of
/// `{matching_mode, url}` objects; the patch uses whichever shape is live.
pub fn redirect_uris_patch(current: &Value, uris: &[String]) -> Option<Value> {
    match current {
        Value::Array(entries) => {
            let live: Vec<&str> = entries
                .iter()
                .filter_map(|e| e.get("url").and_then(Value::as_str))
                .collect();
            if live.len() == entries.len() && live == uris {
                return None;
            }
            let wanted: Vec<Value> = uris
                .iter()
                .map(|url| json!({"matching_mode": "strict", "url": url}))
                .collect();
            Some(json!({"redirect_uris": wanted}))
        }
        _ => {
            let wanted = uris.join("\n");
            if current.as_str() == Some(wanted.as_str()) {
                return None;
            }
            Some(json!({"redirect_uris": wanted}))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogFormat;

    fn catalog() -> Catalog {
        Catalog::parse(
            r#"
[defaults]
cookie_domain = "k8s.example.com"

[outpost.config]
authentik_host_browser = "https://authentik.k8s.example.com"

[[services]]
name = "prometheus"
external_host = "prometheus.k8s.example.com"
internal_host = "kube-prometheus-stack-prometheus.monitoring"
internal_port = 9090
"#,
            CatalogFormat::Toml,
        )
        .unwrap()
    }

    #[test]
    fn test_provider_spec_fields() {
        let catalog = catalog();
        let spec = provider_spec(&catalog, &catalog.services[0], "flow-pk", ProxyMode::Proxy);

        assert_eq!(spec.name, "prometheus-proxy");
        assert_eq!(spec.external_host, "https://prometheus.k8s.example.com");
        assert_eq!(
            spec.internal_host,
            "http://kube-prometheus-stack-prometheus.monitoring:9090"
        );
        assert_eq!(spec.authorization_flow, "flow-pk");
        assert_eq!(spec.cookie_domain, "k8s.example.com");
        assert_eq!(spec.mode, ProxyMode::Proxy);
        assert!(!spec.basic_auth_enabled);
    }

    #[test]
    fn test_application_spec_fields() {
        let catalog = catalog();
        let spec = application_spec(&catalog, &catalog.services[0], 12);

        assert_eq!(spec.slug, "prometheus");
        assert_eq!(spec.provider, 12);
        assert_eq!(spec.meta_description, "prometheus service");
        assert_eq!(spec.meta_launch_url, "https://prometheus.k8s.example.com");
        assert_eq!(spec.policy_engine_mode, "any");
    }

    #[test]
    fn test_outpost_config_update_keeps_identity() {
        let catalog = catalog();
        let outpost: Outpost = serde_json::from_value(json!({
            "pk": "o1",
            "name": "edge",
            "type": "proxy",
            "providers": [1, 2],
            "config": {"log_level": "debug", "authentik_host_browser": "https://old"}
        }))
        .unwrap();

        let update = outpost_config_update(&outpost, &catalog.outpost.config, &[2, 3]);
        assert_eq!(update["name"], "edge");
        assert_eq!(update["type"], "proxy");
        assert_eq!(update["providers"], json!([2, 3]));
        assert_eq!(update["config"]["log_level"], "debug");
        assert_eq!(
            update["config"]["authentik_host_browser"],
            "https://authentik.k8s.example.com"
        );
    }

    #[test]
    fn test_redirect_patch_string_form() {
        let uris = vec!["https://a/cb".to_string(), "https://a/oauth".to_string()];

        assert!(redirect_uris_patch(&json!("https://a/cb\nhttps://a/oauth"), &uris).is_none());
        assert_eq!(
            redirect_uris_patch(&json!("https://old/cb"), &uris),
            Some(json!({"redirect_uris": "https://a/cb\nhttps://a/oauth"}))
        );
        assert!(redirect_uris_patch(&Value::Null, &uris).is_some());
    }

    #[test]
    fn test_redirect_patch_list_form() {
        let uris = vec!["https://a/cb".to_string()];
        let current = json!([{"matching_mode": "strict", "url": "https://a/cb"}]);
        assert!(redirect_uris_patch(&current, &uris).is_none());

        let stale = json!([{"matching_mode": "strict", "url": "https://old/cb"}]);
        let patch = redirect_uris_patch(&stale, &uris).unwrap();
        assert_eq!(patch["redirect_uris"][0]["url"], "https://a/cb");
    }
}

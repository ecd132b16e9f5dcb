//! Redirect fixer
//!
//! Corrects proxy external hosts, OAuth2 redirect URIs and application launch
//! URLs for every catalog service. Unlike the reconciler this compares before
//! writing, so fields that are already right are reported as unchanged.

use super::ResourceOutcome;
use super::payload::redirect_uris_patch;
use crate::config::{Catalog, ServiceConfig};
use anyhow::{Context, Result};
use authentik::{
    Application, Client, Collection, OAuth2Provider, ProxyProvider, Transport,
};
use declarative::{ApplyResult, ApplySummary};
use serde_json::json;

/// Provider bound to a service
#[derive(Debug, Clone, Copy)]
enum ProviderRef<'p> {
    Proxy(&'p ProxyProvider),
    OAuth2(&'p OAuth2Provider),
}

/// Live records the fixer works against
struct Snapshot {
    proxies: Vec<ProxyProvider>,
    oauth2: Vec<OAuth2Provider>,
    applications: Vec<Application>,
}

#[derive(Debug, Default)]
pub struct FixReport {
    pub resources: Vec<ResourceOutcome>,
    pub summary: ApplySummary,
}

impl FixReport {
    pub fn is_success(&self) -> bool {
        self.summary.is_success()
    }
}

pub struct RedirectFixer<'a, T: Transport> {
    client: &'a Client<T>,
    catalog: &'a Catalog,
}

impl<'a, T: Transport> RedirectFixer<'a, T> {
    pub fn new(client: &'a Client<T>, catalog: &'a Catalog) -> Self {
        Self { client, catalog }
    }

    /// Fix every service. Authentication and the initial listings are fatal;
    /// individual writes are not.
    pub fn run(&self) -> Result<FixReport> {
        let user = self.client.whoami().context("Authentication failed")?;
        log::info!("✓ Authenticated as {user}");

        let snapshot = Snapshot {
            proxies: self
                .client
                .list_proxy_providers()
                .context("Failed to list proxy providers")?,
            oauth2: self
                .client
                .list_oauth2_providers()
                .context("Failed to list OAuth2 providers")?,
            applications: self
                .client
                .list_applications()
                .context("Failed to list applications")?,
        };

        let mut report = FixReport::default();
        for service in &self.catalog.services {
            log::info!("=== Fixing {} ===", service.name);
            report.resources.extend(self.fix_service(service, &snapshot));
        }
        report.summary = report.resources.iter().map(|r| &r.result).collect();
        Ok(report)
    }

    fn fix_service(&self, service: &ServiceConfig, snapshot: &Snapshot) -> Vec<ResourceOutcome> {
        let application = snapshot
            .applications
            .iter()
            .find(|a| a.name == service.name);

        let provider = match self.locate_provider(service, application, snapshot) {
            Some(ProviderRef::Proxy(provider)) => self.fix_proxy(service, provider),
            Some(ProviderRef::OAuth2(provider)) => self.fix_oauth2(service, provider),
            None => {
                log::warn!("⚠ No provider found for {}", service.name);
                ResourceOutcome::new(
                    Collection::ProxyProviders,
                    self.catalog.provider_name(service),
                    None,
                    ApplyResult::Skipped {
                        reason: "provider not found".to_string(),
                    },
                )
            }
        };

        let application = match application {
            Some(app) => self.fix_application(service, app),
            None => {
                log::warn!("⚠ Application {} not found", service.name);
                ResourceOutcome::new(
                    Collection::Applications,
                    &service.name,
                    None,
                    ApplyResult::Skipped {
                        reason: "application not found".to_string(),
                    },
                )
            }
        };

        vec![provider, application]
    }

    fn locate_provider<'s>(
        &self,
        service: &ServiceConfig,
        application: Option<&Application>,
        snapshot: &'s Snapshot,
    ) -> Option<ProviderRef<'s>> {
        if let Some(pk) = application.and_then(|a| a.provider) {
            if let Some(p) = snapshot.proxies.iter().find(|p| p.pk == pk) {
                return Some(ProviderRef::Proxy(p));
            }
            if let Some(p) = snapshot.oauth2.iter().find(|p| p.pk == pk) {
                return Some(ProviderRef::OAuth2(p));
            }
        }

        let proxy_name = self.catalog.provider_name(service);
        let oauth2_name = format!("{}-oauth2", service.name);
        snapshot
            .proxies
            .iter()
            .find(|p| p.name == proxy_name)
            .map(ProviderRef::Proxy)
            .or_else(|| {
                snapshot
                    .oauth2
                    .iter()
                    .find(|p| p.name == oauth2_name)
                    .map(ProviderRef::OAuth2)
            })
    }

    fn fix_proxy(&self, service: &ServiceConfig, provider: &ProxyProvider) -> ResourceOutcome {
        let wanted = service.external_url();
        if provider.external_host == wanted {
            log::info!("✓ {} external host already {wanted}", provider.name);
            return unchanged(Collection::ProxyProviders, &provider.name, provider.pk);
        }

        log::info!(
            "Updating {} external host: {} -> {wanted}",
            provider.name,
            provider.external_host
        );
        let result = self
            .client
            .patch_proxy_provider(provider.pk, &json!({"external_host": wanted}))
            .map(|_| ());
        written(Collection::ProxyProviders, &provider.name, provider.pk, result)
    }

    fn fix_oauth2(&self, service: &ServiceConfig, provider: &OAuth2Provider) -> ResourceOutcome {
        let uris = service.redirect_uris();
        let Some(patch) = redirect_uris_patch(&provider.redirect_uris, &uris) else {
            log::info!("✓ {} redirect URIs already correct", provider.name);
            return unchanged(Collection::OAuth2Providers, &provider.name, provider.pk);
        };

        log::info!("Updating {} redirect URIs: {uris:?}", provider.name);
        let result = self
            .client
            .patch_oauth2_provider(provider.pk, &patch)
            .map(|_| ());
        written(Collection::OAuth2Providers, &provider.name, provider.pk, result)
    }

    fn fix_application(&self, service: &ServiceConfig, app: &Application) -> ResourceOutcome {
        let wanted = service.external_url();
        if app.meta_launch_url == wanted {
            log::info!("✓ {} launch URL already {wanted}", app.name);
            return unchanged(Collection::Applications, &app.name, &app.slug);
        }

        log::info!("Updating {} launch URL: {} -> {wanted}", app.name, app.meta_launch_url);
        let result = self
            .client
            .patch_application(&app.slug, &json!({"meta_launch_url": wanted}))
            .map(|_| ());
        written(Collection::Applications, &app.name, &app.slug, result)
    }
}

fn unchanged(kind: Collection, name: &str, id: impl ToString) -> ResourceOutcome {
    ResourceOutcome::new(kind, name, Some(id.to_string()), ApplyResult::NoChange)
}

fn written(
    kind: Collection,
    name: &str,
    id: impl ToString,
    result: authentik::Result<()>,
) -> ResourceOutcome {
    match result {
        Ok(()) => {
            log::info!("✓ Updated {kind} {name}");
            ResourceOutcome::new(kind, name, Some(id.to_string()), ApplyResult::Updated)
        }
        Err(e) => {
            log::error!("✗ Failed to update {kind} {name}: {e}");
            ResourceOutcome::failed(kind, name, e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogFormat;
    use authentik::{Method, MockServer, RetryConfig};

    fn catalog() -> Catalog {
        Catalog::parse(
            r#"
[[services]]
name = "grafana"
external_host = "grafana.k8s.example.com"
internal_host = "grafana.monitoring"
internal_port = 80

[[services]]
name = "longhorn"
external_host = "longhorn.k8s.example.com"
internal_host = "longhorn-frontend.longhorn-system"
internal_port = 80
"#,
            CatalogFormat::Toml,
        )
        .unwrap()
    }

    fn fix(server: &MockServer) -> FixReport {
        let client = Client::new(server.clone()).with_retry(RetryConfig::immediate(1));
        let catalog = catalog();
        RedirectFixer::new(&client, &catalog).run().unwrap()
    }

    #[test]
    fn test_correct_records_are_left_alone() {
        let server = MockServer::new();
        let proxy = server.seed(
            Collection::ProxyProviders,
            json!({"name": "grafana-proxy", "external_host": "https://grafana.k8s.example.com"}),
        );
        server.seed(
            Collection::Applications,
            json!({
                "name": "grafana",
                "slug": "grafana",
                "provider": proxy["pk"],
                "meta_launch_url": "https://grafana.k8s.example.com"
            }),
        );

        let report = fix(&server);

        assert!(report.is_success());
        assert_eq!(report.summary.no_change, 2);
        assert!(server.calls_with(Method::Patch).is_empty());
    }

    #[test]
    fn test_stale_proxy_and_launch_url_are_patched() {
        let server = MockServer::new();
        let proxy = server.seed(
            Collection::ProxyProviders,
            json!({"name": "grafana-proxy", "external_host": "http://grafana.old"}),
        );
        server.seed(
            Collection::Applications,
            json!({
                "name": "grafana",
                "slug": "grafana",
                "provider": proxy["pk"],
                "meta_launch_url": "",
            }),
        );

        let report = fix(&server);

        assert!(report.is_success());
        assert_eq!(report.summary.updated, 2);
        let proxy = server.find(Collection::ProxyProviders, "grafana-proxy").unwrap();
        assert_eq!(proxy["external_host"], "https://grafana.k8s.example.com");
        let app = server.find(Collection::Applications, "grafana").unwrap();
        assert_eq!(app["meta_launch_url"], "https://grafana.k8s.example.com");
    }

    #[test]
    fn test_oauth2_redirects_found_by_name() {
        let server = MockServer::new();
        server.seed(
            Collection::OAuth2Providers,
            json!({"name": "longhorn-oauth2", "redirect_uris": "https://old/cb"}),
        );

        let report = fix(&server);

        let provider = server.find(Collection::OAuth2Providers, "longhorn-oauth2").unwrap();
        let uris = provider["redirect_uris"].as_str().unwrap();
        assert_eq!(uris.lines().count(), 4);
        assert!(uris.starts_with("https://longhorn.k8s.example.com/akprox/callback"));
        assert!(
            report
                .resources
                .iter()
                .any(|r| r.kind == Collection::OAuth2Providers && r.result == ApplyResult::Updated)
        );
    }

    #[test]
    fn test_missing_records_are_skipped() {
        let server = MockServer::new();

        let report = fix(&server);

        assert!(report.is_success());
        assert_eq!(report.summary.skipped, 4);
    }

    #[test]
    fn test_failed_patch_does_not_stop_other_services() {
        let server = MockServer::new();
        server.seed(
            Collection::ProxyProviders,
            json!({"name": "grafana-proxy", "external_host": "http://stale"}),
        );
        server.seed(
            Collection::ProxyProviders,
            json!({"name": "longhorn-proxy", "external_host": "http://stale"}),
        );
        server.fail(Method::Patch, "providers/proxy/", 500, Some(1));

        let report = fix(&server);

        assert!(!report.is_success());
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.updated, 1);
        let longhorn = server.find(Collection::ProxyProviders, "longhorn-proxy").unwrap();
        assert_eq!(longhorn["external_host"], "https://longhorn.k8s.example.com");
    }

    #[test]
    fn test_authentication_failure_is_fatal() {
        let server = MockServer::new();
        server.fail(Method::Get, "core/users/me/", 403, None);
        let client = Client::new(server.clone()).with_retry(RetryConfig::immediate(1));
        let catalog = catalog();

        assert!(RedirectFixer::new(&client, &catalog).run().is_err());
        assert_eq!(server.calls().len(), 1);
    }
}

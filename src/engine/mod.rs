//! Reconciliation engine for akrecon
//!
//! The [`Reconciler`] converges the catalog onto Authentik in one linear
//! pipeline:
//! 1. Authenticate (fatal)
//! 2. Resolve the authorization flow, falling back to a known id
//! 3. Index existing providers and applications by name (fatal)
//! 4. Upsert each service's provider, then its application (per resource)
//! 5. Resolve or create the target outpost (fatal)
//! 6. Empty other outposts holding the same providers (optional)
//! 7. Overwrite the target's provider list (fatal)
//! 8. Merge outpost config and verify membership (optional)
//!
//! Updates always overwrite with the full declared configuration, so a second
//! run converges to the same state without diffing fields.

pub mod outpost;
pub mod payload;
pub mod redirects;
pub mod stores;
pub mod tokens;

use crate::config::{Catalog, ServiceConfig};
use anyhow::{Context, Result, bail};
use authentik::{
    Client, Collection, LogCallback, Outpost, ProxyMode, RetryConfig, Transport, User, with_retry,
};
use declarative::{
    ApplyResult, ApplySummary, MembershipCheck, Pipeline, PipelineReport, ResourceMapping,
    StepObserver, StepOutcome, StepRecord, StepStatus, plan_detach, upsert,
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use stores::{ApplicationStore, ProviderStore};

/// Parameters that distinguish one reconcile run from another
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Overrides every service's provider mode
    pub mode: Option<ProxyMode>,
    pub detach_conflicts: bool,
    /// Explicit target; skips selection
    pub outpost_id: Option<String>,
    pub outpost_name: String,
    pub update_outpost_config: bool,
    pub verify: bool,
    pub verify_attempts: u32,
}

impl ReconcileOptions {
    pub fn from_catalog(catalog: &Catalog) -> Self {
        Self {
            mode: None,
            detach_conflicts: catalog.outpost.detach_conflicts,
            outpost_id: None,
            outpost_name: catalog.outpost.name.clone(),
            update_outpost_config: false,
            verify: false,
            verify_attempts: 3,
        }
    }
}

/// What happened to one remote resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceOutcome {
    pub kind: Collection,
    pub name: String,
    pub id: Option<String>,
    pub result: ApplyResult,
}

impl ResourceOutcome {
    pub fn new(
        kind: Collection,
        name: impl Into<String>,
        id: Option<String>,
        result: ApplyResult,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            id,
            result,
        }
    }

    pub fn failed(kind: Collection, name: impl Into<String>, error: impl ToString) -> Self {
        Self::new(
            kind,
            name,
            None,
            ApplyResult::Failed {
                error: error.to_string(),
            },
        )
    }
}

/// Working state threaded through the pipeline
#[derive(Debug, Default)]
struct RunState {
    flow: String,
    providers: ResourceMapping<u64>,
    applications: ResourceMapping<String>,
    /// Service name to the provider pk produced this run
    produced: HashMap<String, u64>,
    /// Provider pks in catalog order
    assigned: Vec<u64>,
    outposts: Vec<Outpost>,
    target: Option<Outpost>,
    resources: Vec<ResourceOutcome>,
    membership: Option<MembershipCheck<u64>>,
    verified: Option<bool>,
}

/// Outcome of a reconcile run
#[derive(Debug)]
pub struct RunReport {
    pub pipeline: PipelineReport,
    pub resources: Vec<ResourceOutcome>,
    pub summary: ApplySummary,
    pub outpost_id: Option<String>,
    pub outpost_name: Option<String>,
    pub assigned: Vec<u64>,
    /// Assignment echo compared with the intended list
    pub membership: Option<MembershipCheck<u64>>,
    /// Read-back result, when verification ran
    pub verified: Option<bool>,
}

impl RunReport {
    /// No fatal step failed.
    pub fn is_success(&self) -> bool {
        self.pipeline.is_success()
    }

    /// No step and no resource failed.
    pub fn is_complete(&self) -> bool {
        self.is_success() && self.summary.is_success() && self.pipeline.failures().count() == 0
    }
}

/// Logs step boundaries
#[derive(Default)]
pub struct LogObserver {
    started: usize,
}

impl StepObserver for LogObserver {
    fn on_step_start(&mut self, name: &str, outcome: StepOutcome) {
        self.started += 1;
        log::debug!("[{}] {name} ({outcome})", self.started);
    }

    fn on_step_complete(&mut self, record: &StepRecord) {
        if record.status == StepStatus::Succeeded {
            log::trace!("{} done", record.name);
        }
    }
}

/// Identify the token owner, logging the outcome.
pub fn authenticate<T: Transport>(client: &Client<T>) -> authentik::Result<User> {
    match client.whoami() {
        Ok(user) => {
            log::info!("✓ Authenticated as {user}");
            Ok(user)
        }
        Err(e) => {
            log::error!("✗ Authentication failed: {e}");
            Err(e)
        }
    }
}

pub struct Reconciler<'a, T: Transport> {
    client: &'a Client<T>,
    catalog: &'a Catalog,
    options: ReconcileOptions,
    verify_retry: RetryConfig,
}

impl<'a, T: Transport> Reconciler<'a, T> {
    pub fn new(client: &'a Client<T>, catalog: &'a Catalog, options: ReconcileOptions) -> Self {
        let verify_retry = RetryConfig::new(options.verify_attempts, Duration::from_secs(1), 2.0);
        Self {
            client,
            catalog,
            options,
            verify_retry,
        }
    }

    /// Replace the read-back retry schedule used by verification.
    pub fn with_verify_retry(mut self, retry: RetryConfig) -> Self {
        self.verify_retry = retry;
        self
    }

    /// Whether the token authenticates.
    pub fn authenticate_check(&self) -> bool {
        authenticate(self.client).is_ok()
    }

    /// Look up a record by its lookup field and return its pk, falling back
    /// to `fallback` when the lookup fails or finds nothing.
    pub fn resolve_reference(&self, kind: Collection, selector: &str, fallback: &str) -> String {
        let found = self
            .client
            .list::<Value>(kind, &[(kind.lookup_field(), selector)]);

        match found {
            Ok(records) => match records.first().and_then(|r| r.get("pk")).and_then(pk_string) {
                Some(pk) => {
                    log::info!("✓ Using {kind} {selector}: {pk}");
                    pk
                }
                None => {
                    log::warn!("⚠ {kind} {selector} not found, using fallback: {fallback}");
                    fallback.to_string()
                }
            },
            Err(e) => {
                log::warn!(
                    "⚠ Failed to look up {kind} {selector}: {e}, using fallback: {fallback}"
                );
                fallback.to_string()
            }
        }
    }

    /// List a collection once and index it by name.
    pub fn index_existing<Id>(&self, collection: Collection) -> Result<ResourceMapping<Id>>
    where
        Id: Clone + DeserializeOwned,
    {
        let records: Vec<Value> = self
            .client
            .list(collection, &[])
            .with_context(|| format!("Failed to list {collection}s"))?;

        let field = collection.lookup_field();
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let name = record
                .get("name")
                .and_then(Value::as_str)
                .with_context(|| format!("{collection} without a name"))?
                .to_string();
            let id: Id = serde_json::from_value(record.get(field).cloned().unwrap_or(Value::Null))
                .with_context(|| format!("{collection} {name} has an unusable {field}"))?;
            entries.push((name, id));
        }

        let mapping =
            ResourceMapping::from_items(entries, |(name, _)| name.as_str(), |(_, id)| id.clone());
        log::info!("✓ Found {} existing {collection}s", mapping.len());
        Ok(mapping)
    }

    /// Pick the outpost to assign providers to, creating one if none qualifies.
    pub fn resolve_target_container(&self, outposts: &[Outpost]) -> Result<Outpost> {
        if let Some(id) = &self.options.outpost_id {
            if let Some(found) = outposts.iter().find(|o| &o.pk == id) {
                log::info!("✓ Using outpost {} ({id})", found.name);
                return Ok(found.clone());
            }
            let fetched = self
                .client
                .get_outpost(id)
                .with_context(|| format!("Outpost {id} not found"))?;
            log::info!("✓ Using outpost {} ({id})", fetched.name);
            return Ok(fetched);
        }

        let views: Vec<_> = outposts.iter().map(outpost::view).collect();
        let selector = outpost::selector(&self.catalog.outpost, &self.options.outpost_name);
        if let Some(view) = selector.select(&views)
            && let Some(found) = outposts.iter().find(|o| o.pk == view.id)
        {
            log::info!("✓ Using outpost {} ({})", found.name, found.pk);
            return Ok(found.clone());
        }

        log::info!("Creating outpost {}", self.options.outpost_name);
        let spec = payload::outpost_spec(&self.catalog.outpost, &self.options.outpost_name);
        let created = self
            .client
            .create_outpost(&spec)
            .with_context(|| format!("Failed to create outpost {}", spec.name))?;
        log::info!("✓ Created outpost {} ({})", created.name, created.pk);
        Ok(created)
    }

    /// Empty every outpost other than `target_id` that holds any of `owned`.
    pub fn detach_conflicts(
        &self,
        outposts: &[Outpost],
        target_id: &str,
        owned: &[u64],
    ) -> Vec<ResourceOutcome> {
        let views: Vec<_> = outposts.iter().map(outpost::view).collect();
        let plan = plan_detach(&views, &target_id.to_string(), owned);

        if plan.is_empty() {
            log::info!("✓ No conflicting outposts");
        }

        plan.into_iter()
            .map(|detach| {
                log::warn!(
                    "⚠ Outpost {} also holds providers {:?}, removing all of its providers",
                    detach.container_name,
                    detach.conflicting
                );
                match self
                    .client
                    .patch_outpost(&detach.container_id, &json!({"providers": []}))
                {
                    Ok(_) => {
                        log::info!("✓ Detached outpost {}", detach.container_name);
                        ResourceOutcome::new(
                            Collection::Outposts,
                            detach.container_name,
                            Some(detach.container_id),
                            ApplyResult::Updated,
                        )
                    }
                    Err(e) => {
                        log::error!("✗ Failed to detach outpost {}: {e}", detach.container_name);
                        ResourceOutcome::failed(Collection::Outposts, detach.container_name, e)
                    }
                }
            })
            .collect()
    }

    /// Overwrite the outpost's provider list and compare the echo.
    pub fn assign_membership(&self, outpost_id: &str, ids: &[u64]) -> Result<MembershipCheck<u64>> {
        log::info!("Assigning {} providers to outpost {outpost_id}: {ids:?}", ids.len());
        let echoed = self
            .client
            .patch_outpost(outpost_id, &json!({"providers": ids}))
            .with_context(|| format!("Failed to update outpost {outpost_id}"))?;

        let check = MembershipCheck::compare(ids, &echoed.providers);
        match &check {
            MembershipCheck::Exact => log::info!("✓ Outpost {} holds {ids:?}", echoed.name),
            MembershipCheck::Reordered => {
                log::info!("✓ Outpost {} holds the assigned providers (reordered)", echoed.name);
            }
            MembershipCheck::Mismatch {
                missing,
                unexpected,
            } => log::warn!(
                "⚠ Outpost {} echoed missing {missing:?} and unexpected {unexpected:?}",
                echoed.name
            ),
        }
        Ok(check)
    }

    /// Re-read the outpost until its providers equal `ids`.
    pub fn verify_membership(&self, outpost_id: &str, ids: &[u64]) -> Result<()> {
        with_retry(&self.verify_retry, Some(&LogCallback), || {
            let outpost = self.client.get_outpost(outpost_id)?;
            match MembershipCheck::compare(ids, &outpost.providers) {
                MembershipCheck::Mismatch {
                    missing,
                    unexpected,
                } => Err(authentik::Error::Stale(format!(
                    "outpost {} is missing {missing:?} and has unexpected {unexpected:?}",
                    outpost.name
                ))),
                _ => Ok(()),
            }
        })
        .context("Outpost membership did not converge")?;

        log::info!("✓ Verified outpost {outpost_id} membership");
        Ok(())
    }

    /// Run the full pipeline.
    pub fn run(&self) -> RunReport {
        self.run_with(&mut LogObserver::default())
    }

    pub fn run_with<O: StepObserver>(&self, observer: &mut O) -> RunReport {
        let mut state = RunState {
            flow: self.catalog.defaults.fallback_authorization_flow.clone(),
            ..Default::default()
        };

        let pipeline = self.pipeline().run(&mut state, observer);
        let summary: ApplySummary = state.resources.iter().map(|r| &r.result).collect();

        RunReport {
            pipeline,
            summary,
            outpost_id: state.target.as_ref().map(|t| t.pk.clone()),
            outpost_name: state.target.as_ref().map(|t| t.name.clone()),
            resources: state.resources,
            assigned: state.assigned,
            membership: state.membership,
            verified: state.verified,
        }
    }

    fn pipeline(&self) -> Pipeline<'_, RunState> {
        let mut pipeline = Pipeline::new()
            .step("authenticate", StepOutcome::Fatal, move |_: &mut RunState| {
                if !self.authenticate_check() {
                    bail!("API token was rejected or the server is unreachable");
                }
                Ok(())
            })
            .step(
                "resolve authorization flow",
                StepOutcome::Informational,
                move |st: &mut RunState| {
                    let defaults = &self.catalog.defaults;
                    st.flow = self.resolve_reference(
                        Collection::Flows,
                        &defaults.authorization_flow_slug,
                        &defaults.fallback_authorization_flow,
                    );
                    Ok(())
                },
            )
            .step("index proxy providers", StepOutcome::Fatal, move |st: &mut RunState| {
                st.providers = self.index_existing(Collection::ProxyProviders)?;
                Ok(())
            })
            .step("index applications", StepOutcome::Fatal, move |st: &mut RunState| {
                st.applications = self.index_existing(Collection::Applications)?;
                Ok(())
            });

        for service in &self.catalog.services {
            pipeline = pipeline
                .step(
                    format!("provider {}", service.name),
                    StepOutcome::Recoverable,
                    move |st: &mut RunState| self.upsert_provider(service, st),
                )
                .step(
                    format!("application {}", service.name),
                    StepOutcome::Recoverable,
                    move |st: &mut RunState| self.upsert_application(service, st),
                );
        }

        pipeline = pipeline.step(
            "resolve target outpost",
            StepOutcome::Fatal,
            move |st: &mut RunState| {
                st.outposts = self.client.list_outposts().context("Failed to list outposts")?;
                st.target = Some(self.resolve_target_container(&st.outposts)?);
                Ok(())
            },
        );

        if self.options.detach_conflicts {
            pipeline = pipeline.step(
                "detach conflicting outposts",
                StepOutcome::Recoverable,
                move |st: &mut RunState| {
                    let target_id = target(st)?.pk.clone();
                    let outcomes = self.detach_conflicts(&st.outposts, &target_id, &st.assigned);
                    let failed = outcomes.iter().filter(|o| !o.result.is_success()).count();
                    st.resources.extend(outcomes);
                    if failed > 0 {
                        bail!("{failed} conflicting outpost(s) could not be detached");
                    }
                    Ok(())
                },
            );
        }

        pipeline = pipeline.step("assign membership", StepOutcome::Fatal, move |st: &mut RunState| {
            let target = target(st)?;
            if st.assigned.is_empty() {
                bail!("No provider ids collected, leaving outpost {} untouched", target.name);
            }
            let check = self.assign_membership(&target.pk, &st.assigned)?;
            st.membership = Some(check);
            Ok(())
        });

        if self.options.update_outpost_config {
            pipeline = pipeline.step(
                "update outpost config",
                StepOutcome::Recoverable,
                move |st: &mut RunState| {
                    let live = self
                        .client
                        .get_outpost(&target(st)?.pk)
                        .context("Failed to re-read outpost")?;
                    outpost::apply_config(
                        self.client,
                        &live,
                        &self.catalog.outpost.config,
                        &st.assigned,
                    )?;
                    log::info!("✓ Updated config of outpost {}", live.name);
                    Ok(())
                },
            );
        }

        if self.options.verify {
            pipeline = pipeline.step(
                "verify membership",
                StepOutcome::Recoverable,
                move |st: &mut RunState| {
                    let target_id = target(st)?.pk.clone();
                    let result = self.verify_membership(&target_id, &st.assigned);
                    st.verified = Some(result.is_ok());
                    result
                },
            );
        }

        pipeline
    }

    fn upsert_provider(&self, service: &ServiceConfig, st: &mut RunState) -> Result<()> {
        let mode = self.catalog.mode_for(service, self.options.mode);
        let spec = payload::provider_spec(self.catalog, service, &st.flow, mode);
        let name = spec.name.clone();
        let store = ProviderStore {
            client: self.client,
        };

        match upsert(&store, &name, &spec, &mut st.providers) {
            Ok(done) => {
                log::info!("✓ {} proxy provider {name} (pk {})", done.result, done.id);
                st.produced.insert(service.name.clone(), done.id);
                if !st.assigned.contains(&done.id) {
                    st.assigned.push(done.id);
                }
                st.resources.push(ResourceOutcome::new(
                    Collection::ProxyProviders,
                    name,
                    Some(done.id.to_string()),
                    done.result,
                ));
                Ok(())
            }
            Err(e) => {
                st.resources
                    .push(ResourceOutcome::failed(Collection::ProxyProviders, &name, &e));
                Err(e).with_context(|| format!("Proxy provider {name}"))
            }
        }
    }

    fn upsert_application(&self, service: &ServiceConfig, st: &mut RunState) -> Result<()> {
        let Some(&provider) = st.produced.get(&service.name) else {
            log::warn!(
                "⚠ Skipping application {}: its provider was not reconciled",
                service.name
            );
            st.resources.push(ResourceOutcome::new(
                Collection::Applications,
                &service.name,
                None,
                ApplyResult::Skipped {
                    reason: "provider was not reconciled".to_string(),
                },
            ));
            return Ok(());
        };

        let spec = payload::application_spec(self.catalog, service, provider);
        let store = ApplicationStore {
            client: self.client,
        };

        match upsert(&store, &service.name, &spec, &mut st.applications) {
            Ok(done) => {
                log::info!("✓ {} application {}", done.result, service.name);
                st.resources.push(ResourceOutcome::new(
                    Collection::Applications,
                    &service.name,
                    Some(done.id),
                    done.result,
                ));
                Ok(())
            }
            Err(e) => {
                st.resources
                    .push(ResourceOutcome::failed(Collection::Applications, &service.name, &e));
                Err(e).with_context(|| format!("Application {}", service.name))
            }
        }
    }
}

fn target(st: &RunState) -> Result<&Outpost> {
    st.target.as_ref().context("No target outpost resolved")
}

fn pk_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogFormat;
    use authentik::{Method, MockServer};
    use serde_json::json;

    const FALLBACK_FLOW: &str = "be0ee023-11fe-4a43-b453-bc67957cafbf";

    fn catalog() -> Catalog {
        Catalog::parse(
            r#"
[defaults]
cookie_domain = "k8s.example.com"

[outpost]
name = "k8s-external-proxy-outpost"

[outpost.config]
authentik_host_browser = "https://authentik.k8s.example.com"

[[services]]
name = "grafana"
external_host = "grafana.k8s.example.com"
internal_host = "kube-prometheus-stack-grafana.monitoring"
internal_port = 80

[[services]]
name = "prometheus"
external_host = "prometheus.k8s.example.com"
internal_host = "kube-prometheus-stack-prometheus.monitoring"
internal_port = 9090

[[services]]
name = "hubble"
external_host = "hubble.k8s.example.com"
internal_host = "hubble-ui.kube-system"
internal_port = 80
"#,
            CatalogFormat::Toml,
        )
        .unwrap()
    }

    fn client(server: &MockServer) -> Client<MockServer> {
        Client::new(server.clone()).with_retry(RetryConfig::immediate(1))
    }

    fn run(server: &MockServer, catalog: &Catalog, options: ReconcileOptions) -> RunReport {
        let client = client(server);
        Reconciler::new(&client, catalog, options)
            .with_verify_retry(RetryConfig::immediate(3))
            .run()
    }

    fn provider_pks(server: &MockServer) -> Vec<u64> {
        server
            .records(Collection::ProxyProviders)
            .iter()
            .map(|p| p["pk"].as_u64().unwrap())
            .collect()
    }

    fn outpost_members(server: &MockServer, name: &str) -> Vec<u64> {
        let outpost = server.find(Collection::Outposts, name).unwrap();
        serde_json::from_value(outpost["providers"].clone()).unwrap()
    }

    #[test]
    fn test_fresh_install_creates_everything() {
        let server = MockServer::new();
        let catalog = catalog();

        let report = run(&server, &catalog, ReconcileOptions::from_catalog(&catalog));

        assert!(report.is_complete());
        assert_eq!(report.summary.created, 6);
        assert_eq!(server.records(Collection::ProxyProviders).len(), 3);
        assert_eq!(server.records(Collection::Applications).len(), 3);
        assert_eq!(server.records(Collection::Outposts).len(), 1);

        let pks = provider_pks(&server);
        assert_eq!(report.assigned, pks);
        assert_eq!(outpost_members(&server, "k8s-external-proxy-outpost"), pks);
        assert_eq!(report.membership, Some(MembershipCheck::Exact));

        let grafana = server.find(Collection::ProxyProviders, "grafana-proxy").unwrap();
        assert_eq!(grafana["authorization_flow"], FALLBACK_FLOW);
        assert_eq!(grafana["mode"], "forward_single");
        assert_eq!(
            grafana["internal_host"],
            "http://kube-prometheus-stack-grafana.monitoring:80"
        );

        let app = server.find(Collection::Applications, "grafana").unwrap();
        assert_eq!(app["provider"], grafana["pk"]);
        assert_eq!(app["meta_launch_url"], "https://grafana.k8s.example.com");
    }

    #[test]
    fn test_stale_resources_are_updated_in_place() {
        let server = MockServer::new();
        let catalog = catalog();
        let mut pks = Vec::new();
        for service in &catalog.services {
            let provider = server.seed(
                Collection::ProxyProviders,
                json!({
                    "name": format!("{}-proxy", service.name),
                    "internal_host": "http://wrong.example:1",
                    "mode": "proxy"
                }),
            );
            let pk = provider["pk"].as_u64().unwrap();
            pks.push(pk);
            server.seed(
                Collection::Applications,
                json!({
                    "name": service.name,
                    "slug": service.name,
                    "provider": pk,
                    "meta_launch_url": "",
                }),
            );
        }
        server.seed(
            Collection::Outposts,
            json!({
                "name": "k8s-external-proxy-outpost",
                "type": "proxy",
                "providers": [pks[0], 999],
            }),
        );

        let report = run(&server, &catalog, ReconcileOptions::from_catalog(&catalog));

        assert!(report.is_complete());
        assert_eq!(report.summary.updated, 6);
        assert_eq!(report.summary.created, 0);
        assert!(
            server.calls_with(Method::Post).is_empty(),
            "no resource may be created"
        );

        let prometheus = server.find(Collection::ProxyProviders, "prometheus-proxy").unwrap();
        assert_eq!(
            prometheus["internal_host"],
            "http://kube-prometheus-stack-prometheus.monitoring:9090"
        );
        assert_eq!(prometheus["mode"], "forward_single");
        assert_eq!(provider_pks(&server), pks);
        assert_eq!(outpost_members(&server, "k8s-external-proxy-outpost"), pks);
    }

    #[test]
    fn test_authenticate_returns_token_owner() {
        let server = MockServer::new();
        server.set_username("reconciler");

        let user = authenticate(&client(&server)).unwrap();
        assert_eq!(user.username, "reconciler");

        server.fail(Method::Get, "core/users/me/", 403, None);
        let err = authenticate(&client(&server)).unwrap_err();
        assert_eq!(err.status(), Some(403));
    }

    #[test]
    fn test_authentication_failure_aborts_before_any_other_call() {
        let server = MockServer::new();
        server.fail(Method::Get, "core/users/me/", 401, None);
        let catalog = catalog();

        let report = run(&server, &catalog, ReconcileOptions::from_catalog(&catalog));

        assert!(!report.is_success());
        assert_eq!(report.pipeline.aborted_at.as_deref(), Some("authenticate"));
        assert!(server.calls().iter().all(|c| c.path == "core/users/me/"));
        assert!(report.resources.is_empty());
    }

    #[test]
    fn test_one_failed_upsert_does_not_stop_the_others() {
        let server = MockServer::new();
        server.fail(Method::Post, "providers/proxy/", 500, Some(1));
        let catalog = catalog();

        let report = run(&server, &catalog, ReconcileOptions::from_catalog(&catalog));

        assert!(report.is_success());
        assert!(!report.is_complete());
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.created, 4);

        let pks = provider_pks(&server);
        assert_eq!(pks.len(), 2);
        assert_eq!(report.assigned, pks);
        assert_eq!(outpost_members(&server, "k8s-external-proxy-outpost"), pks);
        assert!(server.find(Collection::Applications, "grafana").is_none());
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let server = MockServer::new();
        let catalog = catalog();

        let first = run(&server, &catalog, ReconcileOptions::from_catalog(&catalog));
        let providers_after_first = server.records(Collection::ProxyProviders);
        let second = run(&server, &catalog, ReconcileOptions::from_catalog(&catalog));

        assert!(first.is_complete());
        assert!(second.is_complete());
        assert_eq!(second.summary.created, 0);
        assert_eq!(second.summary.updated, 6);
        assert_eq!(server.records(Collection::ProxyProviders), providers_after_first);
        assert_eq!(server.records(Collection::Outposts).len(), 1);
        assert_eq!(first.assigned, second.assigned);
    }

    #[test]
    fn test_conflicting_outposts_are_emptied() {
        let server = MockServer::new();
        let catalog = catalog();
        let grafana = server.seed(Collection::ProxyProviders, json!({"name": "grafana-proxy"}));
        let pk = grafana["pk"].as_u64().unwrap();
        server.seed(
            Collection::Outposts,
            json!({"name": "authentik Embedded Outpost", "type": "proxy", "providers": [pk]}),
        );
        server.seed(
            Collection::Outposts,
            json!({"name": "ldap-outpost", "type": "ldap", "providers": [777]}),
        );
        server.seed(
            Collection::Outposts,
            json!({"name": "k8s-external-proxy-outpost", "type": "proxy", "providers": []}),
        );

        let report = run(&server, &catalog, ReconcileOptions::from_catalog(&catalog));

        assert!(report.is_complete());
        assert!(outpost_members(&server, "authentik Embedded Outpost").is_empty());
        assert_eq!(outpost_members(&server, "ldap-outpost"), vec![777]);
        assert_eq!(outpost_members(&server, "k8s-external-proxy-outpost").len(), 3);
        assert!(
            report
                .resources
                .iter()
                .any(|r| r.kind == Collection::Outposts && r.result == ApplyResult::Updated)
        );
    }

    #[test]
    fn test_detach_can_be_disabled() {
        let server = MockServer::new();
        let catalog = catalog();
        let grafana = server.seed(Collection::ProxyProviders, json!({"name": "grafana-proxy"}));
        let pk = grafana["pk"].as_u64().unwrap();
        server.seed(
            Collection::Outposts,
            json!({"name": "authentik Embedded Outpost", "type": "proxy", "providers": [pk]}),
        );

        let options = ReconcileOptions {
            detach_conflicts: false,
            ..ReconcileOptions::from_catalog(&catalog)
        };
        let report = run(&server, &catalog, options);

        assert!(report.is_complete());
        assert_eq!(outpost_members(&server, "authentik Embedded Outpost"), vec![pk]);
        assert!(report.pipeline.step("detach conflicting outposts").is_none());
    }

    #[test]
    fn test_explicit_outpost_id() {
        let server = MockServer::new();
        let catalog = catalog();
        server.seed(
            Collection::Outposts,
            json!({"name": "k8s-external-proxy-outpost", "type": "proxy"}),
        );
        let chosen = server.seed(Collection::Outposts, json!({"name": "edge", "type": "proxy"}));

        let options = ReconcileOptions {
            outpost_id: chosen["pk"].as_str().map(str::to_string),
            ..ReconcileOptions::from_catalog(&catalog)
        };
        let report = run(&server, &catalog, options);

        assert!(report.is_complete());
        assert_eq!(report.outpost_name.as_deref(), Some("edge"));
        assert_eq!(outpost_members(&server, "edge").len(), 3);
        assert!(outpost_members(&server, "k8s-external-proxy-outpost").is_empty());
    }

    #[test]
    fn test_missing_explicit_outpost_is_fatal() {
        let server = MockServer::new();
        let catalog = catalog();
        let options = ReconcileOptions {
            outpost_id: Some("does-not-exist".to_string()),
            ..ReconcileOptions::from_catalog(&catalog)
        };

        let report = run(&server, &catalog, options);

        assert!(!report.is_success());
        assert_eq!(
            report.pipeline.aborted_at.as_deref(),
            Some("resolve target outpost")
        );
        assert_eq!(
            report.pipeline.step("assign membership").unwrap().status,
            StepStatus::NotRun
        );
    }

    #[test]
    fn test_flow_lookup_and_mode_override() {
        let server = MockServer::new();
        server.seed(
            Collection::Flows,
            json!({"pk": "flow-1", "slug": "default-authorization-flow"}),
        );
        let catalog = catalog();
        let options = ReconcileOptions {
            mode: Some(ProxyMode::Proxy),
            ..ReconcileOptions::from_catalog(&catalog)
        };

        let report = run(&server, &catalog, options);

        assert!(report.is_complete());
        for provider in server.records(Collection::ProxyProviders) {
            assert_eq!(provider["authorization_flow"], "flow-1");
            assert_eq!(provider["mode"], "proxy");
        }
    }

    #[test]
    fn test_flow_lookup_failure_falls_back() {
        let server = MockServer::new();
        server.fail(Method::Get, "flows/instances/", 500, None);
        let catalog = catalog();

        let report = run(&server, &catalog, ReconcileOptions::from_catalog(&catalog));

        assert!(report.is_complete());
        let hubble = server.find(Collection::ProxyProviders, "hubble-proxy").unwrap();
        assert_eq!(hubble["authorization_flow"], FALLBACK_FLOW);
    }

    #[test]
    fn test_all_providers_failing_leaves_outpost_untouched() {
        let server = MockServer::new();
        server.fail(Method::Post, "providers/proxy/", 500, None);
        let catalog = catalog();
        server.seed(
            Collection::Outposts,
            json!({"name": "k8s-external-proxy-outpost", "type": "proxy", "providers": [5]}),
        );

        let report = run(&server, &catalog, ReconcileOptions::from_catalog(&catalog));

        assert!(!report.is_success());
        assert_eq!(report.pipeline.aborted_at.as_deref(), Some("assign membership"));
        assert_eq!(outpost_members(&server, "k8s-external-proxy-outpost"), vec![5]);
    }

    #[test]
    fn test_reordered_echo_is_accepted() {
        let server = MockServer::new();
        server.reverse_membership_echo(true);
        let catalog = catalog();

        let report = run(&server, &catalog, ReconcileOptions::from_catalog(&catalog));

        assert!(report.is_complete());
        assert_eq!(report.membership, Some(MembershipCheck::Reordered));
    }

    #[test]
    fn test_verify_reports_unapplied_membership_without_failing() {
        let server = MockServer::new();
        server.drop_membership_writes(true);
        let catalog = catalog();
        let options = ReconcileOptions {
            verify: true,
            ..ReconcileOptions::from_catalog(&catalog)
        };

        let report = run(&server, &catalog, options);

        assert!(report.is_success());
        assert!(!report.is_complete());
        assert_eq!(report.verified, Some(false));
        assert!(report.pipeline.step("verify membership").unwrap().failed());
    }

    #[test]
    fn test_verify_and_config_update() {
        let server = MockServer::new();
        let catalog = catalog();
        let options = ReconcileOptions {
            verify: true,
            update_outpost_config: true,
            ..ReconcileOptions::from_catalog(&catalog)
        };

        let report = run(&server, &catalog, options);

        assert!(report.is_complete());
        assert_eq!(report.verified, Some(true));
        let outpost = server.find(Collection::Outposts, "k8s-external-proxy-outpost").unwrap();
        assert_eq!(
            outpost["config"]["authentik_host_browser"],
            "https://authentik.k8s.example.com"
        );
        assert_eq!(outpost["providers"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_index_existing_is_stable() {
        let server = MockServer::new();
        server.seed(Collection::Applications, json!({"name": "grafana", "slug": "grafana"}));
        server.seed(Collection::Applications, json!({"name": "hubble", "slug": "hubble-ui"}));
        let catalog = catalog();
        let client = client(&server);
        let options = ReconcileOptions::from_catalog(&catalog);
        let reconciler = Reconciler::new(&client, &catalog, options);

        let first: ResourceMapping<String> =
            reconciler.index_existing(Collection::Applications).unwrap();
        let second: ResourceMapping<String> =
            reconciler.index_existing(Collection::Applications).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.get("hubble").map(String::as_str), Some("hubble-ui"));
    }
}

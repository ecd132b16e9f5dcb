//! Authentik collections as declarative stores

use authentik::{ApplicationSpec, Client, ProxyProviderSpec, Transport};
use declarative::Store;

/// Proxy providers, keyed by numeric pk.
pub struct ProviderStore<'a, T: Transport> {
    pub client: &'a Client<T>,
}

impl<T: Transport> Store for ProviderStore<'_, T> {
    type Id = u64;
    type Spec = ProxyProviderSpec;
    type Error = authentik::Error;

    fn kind(&self) -> &'static str {
        "proxy provider"
    }

    fn create(&self, spec: &ProxyProviderSpec) -> authentik::Result<u64> {
        Ok(self.client.create_proxy_provider(spec)?.pk)
    }

    fn update(&self, id: &u64, spec: &ProxyProviderSpec) -> authentik::Result<()> {
        self.client.update_proxy_provider(*id, spec).map(|_| ())
    }
}

/// Applications, keyed by slug.
pub struct ApplicationStore<'a, T: Transport> {
    pub client: &'a Client<T>,
}

impl<T: Transport> Store for ApplicationStore<'_, T> {
    type Id = String;
    type Spec = ApplicationSpec;
    type Error = authentik::Error;

    fn kind(&self) -> &'static str {
        "application"
    }

    fn create(&self, spec: &ApplicationSpec) -> authentik::Result<String> {
        Ok(self.client.create_application(spec)?.slug)
    }

    fn update(&self, id: &String, spec: &ApplicationSpec) -> authentik::Result<()> {
        self.client.update_application(id, spec).map(|_| ())
    }
}

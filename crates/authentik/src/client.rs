//! Typed client over a [`Transport`].

use crate::error::{Error, Result};
use crate::retry::{LogCallback, RetryConfig, with_retry};
use crate::transport::{ApiRequest, Method, RawResponse, Transport, UreqTransport};
use crate::types::{
    Application, ApplicationSpec, Collection, OAuth2Provider, Outpost, OutpostSpec, Paginated,
    ProxyProvider, ProxyProviderSpec, Token, User,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Upper bound on pages followed for one listing.
const MAX_PAGES: u64 = 1000;

/// Authentik API client.
///
/// Every call goes through the retry layer: a non-2xx status or a transport
/// failure is retried with exponential backoff, and the last error is returned
/// once the attempts are used up.
pub struct Client<T: Transport = UreqTransport> {
    transport: T,
    retry: RetryConfig,
}

impl Client<UreqTransport> {
    /// Create a client for a live server.
    pub fn connect(host: &str, token: &str) -> Self {
        Self::new(UreqTransport::new(host, token))
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            retry: RetryConfig::default(),
        }
    }

    /// Replace the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Send a request, retrying until it succeeds or attempts run out.
    pub fn execute(&self, request: &ApiRequest) -> Result<RawResponse> {
        log::trace!("{request}");
        with_retry(&self.retry, Some(&LogCallback), || {
            let response = self.transport.send(request)?;
            if response.is_success() {
                Ok(response)
            } else {
                Err(Error::Api {
                    method: request.method,
                    path: request.path.clone(),
                    status: response.status,
                    body: response.body,
                })
            }
        })
    }

    /// Issue `method path` with an optional JSON body and return the status
    /// and decoded body of the successful response.
    pub fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<(u16, Value)> {
        let mut request = ApiRequest::new(method, path);
        request.body = body;
        let response = self.execute(&request)?;
        Ok((response.status, response.body))
    }

    /// List every record of a collection, following pagination.
    pub fn list<R: DeserializeOwned>(
        &self,
        collection: Collection,
        filters: &[(&str, &str)],
    ) -> Result<Vec<R>> {
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let mut request = ApiRequest::get(collection.path());
            for (key, value) in filters {
                request = request.query(*key, *value);
            }
            request = request.query("page", page.to_string());

            let response = self.execute(&request)?;
            let parsed: Paginated<Value> = serde_json::from_value(response.body).map_err(|e| {
                Error::InvalidResponse(format!("{} listing: {e}", collection.label()))
            })?;

            for item in parsed.results {
                records.push(decode(collection, item)?);
            }

            let next = parsed.pagination.map_or(0, |p| p.next);
            if next <= page || next > MAX_PAGES {
                break;
            }
            page = next;
        }

        Ok(records)
    }

    /// The token owner. Accepts both the nested `{"user": {..}}` shape and a
    /// bare user object.
    pub fn whoami(&self) -> Result<User> {
        let (_, mut body) = self.request(Method::Get, "core/users/me/", None)?;
        let user = match body.get_mut("user") {
            Some(nested) => nested.take(),
            None => body,
        };
        serde_json::from_value(user)
            .map_err(|e| Error::InvalidResponse(format!("core/users/me/: {e}")))
    }

    pub fn list_proxy_providers(&self) -> Result<Vec<ProxyProvider>> {
        self.list(Collection::ProxyProviders, &[])
    }

    pub fn list_oauth2_providers(&self) -> Result<Vec<OAuth2Provider>> {
        self.list(Collection::OAuth2Providers, &[])
    }

    pub fn list_applications(&self) -> Result<Vec<Application>> {
        self.list(Collection::Applications, &[])
    }

    pub fn list_outposts(&self) -> Result<Vec<Outpost>> {
        self.list(Collection::Outposts, &[])
    }

    /// Raw outpost records, for reports that show every field.
    pub fn list_outposts_raw(&self) -> Result<Vec<Value>> {
        self.list(Collection::Outposts, &[])
    }

    pub fn find_outposts_by_name(&self, name: &str) -> Result<Vec<Outpost>> {
        self.list(Collection::Outposts, &[("name", name)])
    }

    pub fn list_tokens(&self) -> Result<Vec<Token>> {
        self.list(Collection::Tokens, &[])
    }

    pub fn get_outpost(&self, id: &str) -> Result<Outpost> {
        self.get(Collection::Outposts, id)
    }

    /// Fetch one record by its lookup field.
    pub fn get<R: DeserializeOwned>(&self, collection: Collection, id: &str) -> Result<R> {
        let response = self.execute(&ApiRequest::get(collection.detail_path(id)))?;
        decode(collection, response.body)
    }

    /// POST a new record.
    pub fn create<S: Serialize, R: DeserializeOwned>(
        &self,
        collection: Collection,
        payload: &S,
    ) -> Result<R> {
        let body = serde_json::to_value(payload)?;
        let request = ApiRequest::new(Method::Post, collection.path()).with_body(body);
        let response = self.execute(&request)?;
        decode(collection, response.body)
    }

    /// PATCH an existing record.
    pub fn patch<S: Serialize, R: DeserializeOwned>(
        &self,
        collection: Collection,
        id: &str,
        payload: &S,
    ) -> Result<R> {
        let request = ApiRequest::new(Method::Patch, collection.detail_path(id))
            .with_body(serde_json::to_value(payload)?);
        let response = self.execute(&request)?;
        decode(collection, response.body)
    }

    pub fn create_proxy_provider(&self, spec: &ProxyProviderSpec) -> Result<ProxyProvider> {
        self.create(Collection::ProxyProviders, spec)
    }

    pub fn update_proxy_provider(
        &self,
        pk: u64,
        spec: &ProxyProviderSpec,
    ) -> Result<ProxyProvider> {
        self.patch(Collection::ProxyProviders, &pk.to_string(), spec)
    }

    pub fn patch_proxy_provider(&self, pk: u64, fields: &Value) -> Result<ProxyProvider> {
        self.patch(Collection::ProxyProviders, &pk.to_string(), fields)
    }

    pub fn patch_oauth2_provider(&self, pk: u64, fields: &Value) -> Result<OAuth2Provider> {
        self.patch(Collection::OAuth2Providers, &pk.to_string(), fields)
    }

    pub fn create_application(&self, spec: &ApplicationSpec) -> Result<Application> {
        self.create(Collection::Applications, spec)
    }

    pub fn update_application(&self, slug: &str, spec: &ApplicationSpec) -> Result<Application> {
        self.patch(Collection::Applications, slug, spec)
    }

    pub fn patch_application(&self, slug: &str, fields: &Value) -> Result<Application> {
        self.patch(Collection::Applications, slug, fields)
    }

    pub fn create_outpost(&self, spec: &OutpostSpec) -> Result<Outpost> {
        self.create(Collection::Outposts, spec)
    }

    pub fn patch_outpost(&self, id: &str, fields: &Value) -> Result<Outpost> {
        self.patch(Collection::Outposts, id, fields)
    }

    /// Reveal a token's key.
    pub fn view_token_key(&self, identifier: &str) -> Result<String> {
        let path = format!("{}view_key/", Collection::Tokens.detail_path(identifier));
        let (_, body) = self.request(Method::Get, &path, None)?;
        body.get("key")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidResponse(format!("no key for token {identifier}")))
    }
}

fn decode<R: DeserializeOwned>(collection: Collection, value: Value) -> Result<R> {
    serde_json::from_value(value)
        .map_err(|e| Error::InvalidResponse(format!("{} record: {e}", collection.label())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockServer;
    use serde_json::json;

    fn client(server: &MockServer) -> Client<MockServer> {
        Client::new(server.clone()).with_retry(RetryConfig::immediate(3))
    }

    #[test]
    fn test_whoami_reads_nested_user() {
        let server = MockServer::new();
        let user = client(&server).whoami().unwrap();
        assert_eq!(user.username, "akadmin");
        assert_eq!(user.pk, 1);
    }

    #[test]
    fn test_request_returns_status_and_body() {
        let server = MockServer::new();
        let (status, body) = client(&server)
            .request(
                Method::Post,
                "providers/proxy/",
                Some(json!({"name": "grafana-proxy"})),
            )
            .unwrap();
        assert_eq!(status, 201);
        assert_eq!(body["name"], "grafana-proxy");
        assert!(body["pk"].is_u64());
    }

    #[test]
    fn test_list_follows_pagination() {
        let server = MockServer::new().with_page_size(2);
        for i in 0..5 {
            server.seed(
                Collection::ProxyProviders,
                json!({"name": format!("svc{i}-proxy")}),
            );
        }

        let providers = client(&server).list_proxy_providers().unwrap();
        assert_eq!(providers.len(), 5);
        assert_eq!(providers[4].name, "svc4-proxy");

        let pages = server
            .calls()
            .iter()
            .filter(|c| c.path == "providers/proxy/")
            .count();
        assert_eq!(pages, 3);
    }

    #[test]
    fn test_retries_then_succeeds() {
        let server = MockServer::new();
        server.fail(Method::Get, "core/users/me/", 503, Some(2));

        assert_eq!(client(&server).whoami().unwrap().username, "akadmin");
        assert_eq!(server.calls().len(), 3);
    }

    #[test]
    fn test_exhaustion_carries_status_and_body() {
        let server = MockServer::new();
        server.fail(Method::Get, "core/users/me/", 401, None);

        let err = client(&server).whoami().unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(err.body().is_some());
        assert_eq!(server.calls().len(), 3);
    }

    #[test]
    fn test_create_and_patch_application_by_slug() {
        let server = MockServer::new();
        let client = client(&server);
        let spec = ApplicationSpec {
            name: "grafana".to_string(),
            slug: "grafana".to_string(),
            provider: 4,
            meta_description: "grafana service".to_string(),
            meta_launch_url: "https://grafana.example.com".to_string(),
            policy_engine_mode: "any".to_string(),
        };

        let created = client.create_application(&spec).unwrap();
        assert_eq!(created.slug, "grafana");
        assert_eq!(created.provider, Some(4));

        let patched = client
            .patch_application("grafana", &json!({"meta_launch_url": "https://g.example.com"}))
            .unwrap();
        assert_eq!(patched.meta_launch_url, "https://g.example.com");
        assert_eq!(patched.pk, created.pk);
    }

    #[test]
    fn test_view_token_key() {
        let server = MockServer::new();
        server.seed(
            Collection::Tokens,
            json!({
                "identifier": "ak-outpost-abc-api",
                "description": "outpost token",
                "key": "s3cret",
            }),
        );

        let client = client(&server);
        assert_eq!(client.view_token_key("ak-outpost-abc-api").unwrap(), "s3cret");
        assert!(client.view_token_key("missing").is_err());
    }

    #[test]
    fn test_invalid_record_is_not_retried() {
        let server = MockServer::new();
        server.seed(
            Collection::Outposts,
            json!({"pk": "x", "name": "broken", "providers": "nope"}),
        );

        let err = client(&server).list_outposts().unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
        assert_eq!(server.calls().len(), 1);
    }
}

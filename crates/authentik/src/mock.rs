//! In-memory Authentik server for testing.
//!
//! [`MockServer`] implements [`Transport`] over a set of JSON collections. It
//! understands list (with query filters and pagination), create, detail
//! get/patch/delete and token key reveal, and it records every request so
//! tests can assert on exactly what was sent.

use crate::error::Result;
use crate::transport::{ApiRequest, Method, RawResponse, Transport};
use crate::types::Collection;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Injected failure: requests matching `method` whose path contains `path`
/// are answered with `status`.
#[derive(Debug, Clone)]
struct Failure {
    method: Method,
    path: String,
    status: u16,
    /// `None` fails forever.
    remaining: Option<usize>,
}

#[derive(Debug)]
struct State {
    collections: HashMap<Collection, Vec<Value>>,
    next_pk: u64,
    page_size: Option<usize>,
    username: String,
    failures: Vec<Failure>,
    calls: Vec<ApiRequest>,
    reverse_membership_echo: bool,
    drop_membership_writes: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            collections: HashMap::new(),
            next_pk: 1,
            page_size: None,
            username: "akadmin".to_string(),
            failures: Vec::new(),
            calls: Vec::new(),
            reverse_membership_echo: false,
            drop_membership_writes: false,
        }
    }
}

/// Shared, cloneable in-memory server.
#[derive(Debug, Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<State>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split list responses into pages of `size` records.
    pub fn with_page_size(self, size: usize) -> Self {
        self.state().page_size = Some(size.max(1));
        self
    }

    pub fn set_username(&self, username: &str) {
        self.state().username = username.to_string();
    }

    /// Insert a record directly, assigning a primary key when it has none.
    pub fn seed(&self, collection: Collection, record: Value) -> Value {
        let mut state = self.state();
        let record = state.prepare_record(collection, record);
        state.records_mut(collection).push(record.clone());
        record
    }

    /// Snapshot of a collection.
    pub fn records(&self, collection: Collection) -> Vec<Value> {
        self.state()
            .collections
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Look up one record by name.
    pub fn find(&self, collection: Collection, name: &str) -> Option<Value> {
        self.records(collection)
            .into_iter()
            .find(|r| r.get("name").and_then(Value::as_str) == Some(name))
    }

    /// Answer matching requests with `status`, `times` times or forever.
    pub fn fail(&self, method: Method, path_contains: &str, status: u16, times: Option<usize>) {
        self.state().failures.push(Failure {
            method,
            path: path_contains.to_string(),
            status,
            remaining: times,
        });
    }

    /// Every request received so far, in order.
    pub fn calls(&self) -> Vec<ApiRequest> {
        self.state().calls.clone()
    }

    /// Requests received with a given method.
    pub fn calls_with(&self, method: Method) -> Vec<ApiRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }

    /// Echo outpost member lists in reverse order on PATCH.
    pub fn reverse_membership_echo(&self, enabled: bool) {
        self.state().reverse_membership_echo = enabled;
    }

    /// Accept outpost member list writes without applying them.
    pub fn drop_membership_writes(&self, enabled: bool) {
        self.state().drop_membership_writes = enabled;
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MockServer {
    fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
        let mut state = self.state();
        state.calls.push(request.clone());

        if let Some(status) = state.injected_failure(request) {
            return Ok(respond(status, json!({"detail": "injected failure"})));
        }

        let path = request.path.trim_matches('/');
        if path == "core/users/me" {
            return Ok(match request.method {
                Method::Get => respond(
                    200,
                    json!({"user": {"pk": 1, "username": state.username, "name": state.username}}),
                ),
                _ => not_allowed(),
            });
        }

        let Some((collection, rest)) = route(path) else {
            return Ok(not_found());
        };
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

        Ok(match (request.method, segments.as_slice()) {
            (Method::Get, []) => state.list(collection, &request.query),
            (Method::Post, []) => state.create(collection, request.body.clone()),
            (Method::Get, [id]) => state
                .position(collection, id)
                .map(|i| respond(200, state.records_mut(collection)[i].clone()))
                .unwrap_or_else(not_found),
            (Method::Patch, [id]) => state.patch(collection, id, request.body.as_ref()),
            (Method::Delete, [id]) => match state.position(collection, id) {
                Some(i) => {
                    state.records_mut(collection).remove(i);
                    respond(204, json!({}))
                }
                None => not_found(),
            },
            (Method::Get, [id, "view_key"]) if collection == Collection::Tokens => state
                .position(collection, id)
                .and_then(|i| state.records_mut(collection)[i].get("key").cloned())
                .filter(|key| !key.is_null())
                .map(|key| respond(200, json!({"key": key})))
                .unwrap_or_else(not_found),
            _ => not_allowed(),
        })
    }
}

impl State {
    fn records_mut(&mut self, collection: Collection) -> &mut Vec<Value> {
        self.collections.entry(collection).or_default()
    }

    fn injected_failure(&mut self, request: &ApiRequest) -> Option<u16> {
        let failure = self.failures.iter_mut().find(|f| {
            f.method == request.method
                && request.path.contains(&f.path)
                && f.remaining.is_none_or(|n| n > 0)
        })?;
        if let Some(n) = failure.remaining.as_mut() {
            *n -= 1;
        }
        Some(failure.status)
    }

    fn allocate_pk(&mut self, collection: Collection) -> Value {
        let n = self.next_pk;
        self.next_pk += 1;
        if collection.numeric_pk() {
            json!(n)
        } else {
            json!(format!("{n:08x}-0000-4000-8000-{n:012x}"))
        }
    }

    fn prepare_record(&mut self, collection: Collection, record: Value) -> Value {
        let mut object = match record {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if !object.contains_key("pk") {
            let pk = self.allocate_pk(collection);
            object.insert("pk".to_string(), pk);
        }
        if collection == Collection::Outposts {
            object.entry("providers").or_insert_with(|| json!([]));
            object.entry("config").or_insert_with(|| json!({}));
        }
        Value::Object(object)
    }

    fn position(&mut self, collection: Collection, id: &str) -> Option<usize> {
        let field = collection.lookup_field();
        self.records_mut(collection)
            .iter()
            .position(|r| r.get(field).is_some_and(|v| value_matches(v, id)))
    }

    fn list(&mut self, collection: Collection, query: &[(String, String)]) -> RawResponse {
        let mut page = 1usize;
        let mut filters = Vec::new();
        for (key, value) in query {
            match key.as_str() {
                "page" => page = value.parse().unwrap_or(1).max(1),
                "page_size" | "ordering" | "search" => {}
                _ => filters.push((key.as_str(), value.as_str())),
            }
        }

        let page_size = self.page_size;
        let matching: Vec<Value> = self
            .records_mut(collection)
            .iter()
            .filter(|r| {
                filters
                    .iter()
                    .all(|(k, v)| r.get(*k).is_some_and(|field| value_matches(field, v)))
            })
            .cloned()
            .collect();

        let total = matching.len();
        let size = page_size.unwrap_or(total.max(1));
        let start = (page - 1) * size;
        let results: Vec<Value> = matching.into_iter().skip(start).take(size).collect();
        let next = if start + size < total { page + 1 } else { 0 };

        respond(
            200,
            json!({
                "pagination": {"next": next, "current": page, "count": total},
                "results": results,
            }),
        )
    }

    fn create(&mut self, collection: Collection, body: Option<Value>) -> RawResponse {
        let Some(body @ Value::Object(_)) = body else {
            return respond(400, json!({"non_field_errors": ["Invalid data."]}));
        };

        if let Some(name) = body.get("name").and_then(Value::as_str) {
            let taken = self
                .records_mut(collection)
                .iter()
                .any(|r| r.get("name").and_then(Value::as_str) == Some(name));
            if taken {
                let message = format!("{} with this name already exists.", collection.label());
                return respond(400, json!({"name": [message]}));
            }
        }

        let mut body = body;
        if let Value::Object(map) = &mut body {
            map.remove("pk");
        }
        let record = self.prepare_record(collection, body);
        self.records_mut(collection).push(record.clone());
        respond(201, record)
    }

    fn patch(&mut self, collection: Collection, id: &str, body: Option<&Value>) -> RawResponse {
        let Some(index) = self.position(collection, id) else {
            return not_found();
        };
        let drop_members = collection == Collection::Outposts && self.drop_membership_writes;
        let reverse_echo = collection == Collection::Outposts && self.reverse_membership_echo;

        let record = &mut self.records_mut(collection)[index];
        if let (Some(Value::Object(fields)), Value::Object(target)) = (body, &mut *record) {
            for (key, value) in fields {
                if key == "pk" || (drop_members && key == "providers") {
                    continue;
                }
                target.insert(key.clone(), value.clone());
            }
        }

        let mut echo = record.clone();
        if reverse_echo && let Some(Value::Array(members)) = echo.get_mut("providers") {
            members.reverse();
        }
        respond(200, echo)
    }
}

fn route(path: &str) -> Option<(Collection, &str)> {
    Collection::ALL.into_iter().find_map(|collection| {
        let base = collection.path().trim_end_matches('/');
        let rest = path.strip_prefix(base)?;
        (rest.is_empty() || rest.starts_with('/')).then_some((collection, rest))
    })
}

fn value_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        _ => false,
    }
}

fn respond(status: u16, body: Value) -> RawResponse {
    RawResponse { status, body }
}

fn not_found() -> RawResponse {
    respond(404, json!({"detail": "Not found."}))
}

fn not_allowed() -> RawResponse {
    respond(405, json!({"detail": "Method not allowed."}))
}

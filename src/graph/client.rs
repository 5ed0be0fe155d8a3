//! # Graph Client
//!
//! HTTP client for Microsoft Graph v1.0 directory objects.
//!
//! - Bearer token from a [`TokenSource`] on every request
//! - OData error bodies mapped to [`GraphError::Api`]
//! - `@odata.nextLink` pagination for collections
//! - 429/502/503/504 retried, honouring `Retry-After`, with a Fibonacci delay otherwise

use crate::backoff::FibonacciBackoff;
use crate::config::ProviderConfig;
use crate::constants::{DEFAULT_HTTP_RETRY_MAX_MS, DEFAULT_HTTP_RETRY_START_MS};
use crate::error::{GraphError, GraphResult};
use crate::graph::auth::TokenSource;
use crate::graph::models::{
    Application, DirectoryObject, Domain, Group, ODataErrorResponse, ODataList, User,
};
use crate::graph::{ApplicationsApi, DomainsApi, GroupsApi, UsersApi};
use crate::observability::metrics;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn, Instrument};

/// Graph caps `@odata.bind` arrays at 20 references per request
const MAX_BIND_REFERENCES: usize = 20;

/// Delay asked for by `Retry-After` in seconds, capped at the longest retry delay
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| {
            Duration::from_secs(secs).min(Duration::from_millis(DEFAULT_HTTP_RETRY_MAX_MS))
        })
}

/// Microsoft Graph directory client
pub struct GraphClient {
    http: Client,
    base_url: String,
    tokens: TokenSource,
    max_retries: u32,
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl GraphClient {
    /// Create a client for the Graph endpoint described by `config`
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub fn new(config: &ProviderConfig, tokens: TokenSource) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.graph_base_url(),
            tokens,
            max_retries: config.http_max_retries,
        })
    }

    /// Client against an arbitrary base URL (a mock server in tests)
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub fn with_base_url(base_url: &str, tokens: TokenSource) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            max_retries: 0,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn directory_object_ref(&self, id: &str) -> String {
        format!("{}/directoryObjects/{id}", self.base_url)
    }

    /// Wrap one Graph operation in a span and record its metrics
    async fn observe<T, Fut>(
        &self,
        object_type: &'static str,
        operation: &'static str,
        id: &str,
        fut: Fut,
    ) -> GraphResult<T>
    where
        Fut: Future<Output = GraphResult<T>>,
    {
        let span = info_span!(
            "graph.request",
            object.type = object_type,
            object.id = id,
            operation.type = operation,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
            error.message = tracing::field::Empty
        );
        let span_clone = span.clone();
        let start = Instant::now();

        async move {
            let result = fut.await;
            let elapsed = start.elapsed();
            span_clone.record(
                "operation.duration_ms",
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            );
            match &result {
                Ok(_) => {
                    metrics::record_graph_operation(object_type, operation, elapsed.as_secs_f64());
                    span_clone.record("operation.success", true);
                }
                Err(e) if e.is_not_found() => {
                    // 404 is an answer, not a failure
                    metrics::record_graph_operation(object_type, operation, elapsed.as_secs_f64());
                    span_clone.record("operation.success", true);
                    debug!("{object_type} {operation} returned 404");
                }
                Err(e) => {
                    metrics::increment_graph_operation_errors(object_type, operation);
                    span_clone.record("operation.success", false);
                    span_clone.record("error.message", e.to_string());
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Send a request, retrying throttled and unavailable responses
    async fn execute(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> GraphResult<Response> {
        let mut backoff = FibonacciBackoff::new(
            Duration::from_millis(DEFAULT_HTTP_RETRY_START_MS),
            Duration::from_millis(DEFAULT_HTTP_RETRY_MAX_MS),
        );
        let mut attempt = 0u32;

        loop {
            let token = self.tokens.token().await?;
            let mut request = self
                .http
                .request(method.clone(), url)
                .bearer_auth(&token)
                .header(ACCEPT, "application/json");
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            if response.status().is_success() {
                return Ok(response);
            }

            let retry_after = retry_after(response.headers());
            let error = error_from_response(response).await;

            if error.is_retryable() && attempt < self.max_retries {
                attempt += 1;
                let status = error.status().unwrap_or_default();
                metrics::increment_graph_retries(status);
                let delay = retry_after.unwrap_or_else(|| backoff.next_backoff());
                warn!(
                    "Graph returned HTTP {status} for {method} {url}, \
                     retrying in {}ms (attempt {attempt}/{})",
                    delay.as_millis(),
                    self.max_retries
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(error);
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> GraphResult<T> {
        let response = self.execute(Method::GET, &self.url(path), &[], None).await?;
        parse_json(response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> GraphResult<T> {
        let response = self
            .execute(Method::POST, &self.url(path), &[], Some(body))
            .await?;
        parse_json(response).await
    }

    async fn send_no_content(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> GraphResult<()> {
        self.execute(method, &self.url(path), &[], body).await?;
        Ok(())
    }

    /// Collect every page of a collection
    async fn list_paged<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> GraphResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(self.url(path));
        let mut first = true;

        while let Some(url) = next {
            // nextLink already carries the original query
            let page_query = if first { query } else { &[] };
            let response = self.execute(Method::GET, &url, page_query, None).await?;
            let page: ODataList<T> = parse_json(response).await?;
            items.extend(page.value);
            next = page.next_link;
            first = false;
        }

        Ok(items)
    }

    async fn list_reference_ids(&self, path: &str) -> GraphResult<Vec<String>> {
        let objects: Vec<DirectoryObject> = self.list_paged(path, &[("$select", "id")]).await?;
        Ok(objects.into_iter().filter_map(|o| o.id).collect())
    }

    async fn add_references(&self, path: &str, ids: &[String]) -> GraphResult<()> {
        for id in ids {
            let body = json!({ "@odata.id": self.directory_object_ref(id) });
            self.send_no_content(Method::POST, &format!("{path}/$ref"), Some(&body))
                .await?;
        }
        Ok(())
    }

    async fn remove_references(&self, path: &str, ids: &[String]) -> GraphResult<()> {
        for id in ids {
            self.send_no_content(Method::DELETE, &format!("{path}/{id}/$ref"), None)
                .await?;
        }
        Ok(())
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> GraphResult<T> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn error_from_response(response: Response) -> GraphError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ODataErrorResponse>(&body) {
        Ok(parsed) => GraphError::Api {
            status: status.as_u16(),
            code: parsed.error.code,
            message: parsed.error.message,
        },
        Err(_) => GraphError::Api {
            status: status.as_u16(),
            code: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: body,
        },
    }
}

fn filter_query(filter: Option<&str>) -> Vec<(&str, &str)> {
    filter.map(|f| vec![("$filter", f)]).unwrap_or_default()
}

fn to_body<T: serde::Serialize>(value: &T) -> GraphResult<Value> {
    Ok(serde_json::to_value(value)?)
}

#[async_trait]
impl ApplicationsApi for GraphClient {
    async fn get_application(&self, id: &str) -> GraphResult<Application> {
        self.observe("application", "get", id, self.get_json(&format!("applications/{id}")))
            .await
    }

    async fn create_application(&self, application: &Application) -> GraphResult<Application> {
        let display_name = application.display_name.clone().unwrap_or_default();
        self.observe("application", "create", &display_name, async {
            let body = to_body(application)?;
            self.post_json("applications", &body).await
        })
        .await
    }

    async fn update_application(&self, id: &str, patch: &Application) -> GraphResult<()> {
        self.observe("application", "update", id, async {
            let body = to_body(patch)?;
            self.send_no_content(Method::PATCH, &format!("applications/{id}"), Some(&body))
                .await
        })
        .await
    }

    async fn delete_application(&self, id: &str) -> GraphResult<()> {
        self.observe(
            "application",
            "delete",
            id,
            self.send_no_content(Method::DELETE, &format!("applications/{id}"), None),
        )
        .await
    }

    async fn list_applications(&self, filter: Option<&str>) -> GraphResult<Vec<Application>> {
        self.observe(
            "application",
            "list",
            filter.unwrap_or_default(),
            self.list_paged("applications", &filter_query(filter)),
        )
        .await
    }

    async fn list_application_owners(&self, id: &str) -> GraphResult<Vec<String>> {
        self.observe(
            "application",
            "list_owners",
            id,
            self.list_reference_ids(&format!("applications/{id}/owners")),
        )
        .await
    }

    async fn add_application_owners(&self, id: &str, owner_ids: &[String]) -> GraphResult<()> {
        self.observe(
            "application",
            "add_owners",
            id,
            self.add_references(&format!("applications/{id}/owners"), owner_ids),
        )
        .await
    }

    async fn remove_application_owners(&self, id: &str, owner_ids: &[String]) -> GraphResult<()> {
        self.observe(
            "application",
            "remove_owners",
            id,
            self.remove_references(&format!("applications/{id}/owners"), owner_ids),
        )
        .await
    }
}

#[async_trait]
impl GroupsApi for GraphClient {
    async fn get_group(&self, id: &str) -> GraphResult<Group> {
        self.observe("group", "get", id, self.get_json(&format!("groups/{id}")))
            .await
    }

    async fn create_group(
        &self,
        group: &Group,
        owner_ids: &[String],
        member_ids: &[String],
    ) -> GraphResult<Group> {
        let display_name = group.display_name.clone().unwrap_or_default();
        self.observe("group", "create", &display_name, async {
            let mut body = to_body(group)?;
            if let Value::Object(fields) = &mut body {
                if !owner_ids.is_empty() {
                    let refs: Vec<String> =
                        owner_ids.iter().map(|id| self.directory_object_ref(id)).collect();
                    fields.insert("owners@odata.bind".to_string(), json!(refs));
                }
                if !member_ids.is_empty() {
                    let refs: Vec<String> =
                        member_ids.iter().map(|id| self.directory_object_ref(id)).collect();
                    fields.insert("members@odata.bind".to_string(), json!(refs));
                }
            }
            self.post_json("groups", &body).await
        })
        .await
    }

    async fn update_group(&self, id: &str, patch: &Group) -> GraphResult<()> {
        self.observe("group", "update", id, async {
            let body = to_body(patch)?;
            self.send_no_content(Method::PATCH, &format!("groups/{id}"), Some(&body))
                .await
        })
        .await
    }

    async fn delete_group(&self, id: &str) -> GraphResult<()> {
        self.observe(
            "group",
            "delete",
            id,
            self.send_no_content(Method::DELETE, &format!("groups/{id}"), None),
        )
        .await
    }

    async fn list_groups(&self, filter: Option<&str>) -> GraphResult<Vec<Group>> {
        self.observe(
            "group",
            "list",
            filter.unwrap_or_default(),
            self.list_paged("groups", &filter_query(filter)),
        )
        .await
    }

    async fn list_group_owners(&self, id: &str) -> GraphResult<Vec<String>> {
        self.observe(
            "group",
            "list_owners",
            id,
            self.list_reference_ids(&format!("groups/{id}/owners")),
        )
        .await
    }

    async fn add_group_owners(&self, id: &str, owner_ids: &[String]) -> GraphResult<()> {
        self.observe(
            "group",
            "add_owners",
            id,
            self.add_references(&format!("groups/{id}/owners"), owner_ids),
        )
        .await
    }

    async fn remove_group_owners(&self, id: &str, owner_ids: &[String]) -> GraphResult<()> {
        self.observe(
            "group",
            "remove_owners",
            id,
            self.remove_references(&format!("groups/{id}/owners"), owner_ids),
        )
        .await
    }

    async fn list_group_members(&self, id: &str) -> GraphResult<Vec<String>> {
        self.observe(
            "group",
            "list_members",
            id,
            self.list_reference_ids(&format!("groups/{id}/members")),
        )
        .await
    }

    async fn add_group_members(&self, id: &str, member_ids: &[String]) -> GraphResult<()> {
        self.observe("group", "add_members", id, async {
            for chunk in member_ids.chunks(MAX_BIND_REFERENCES) {
                let refs: Vec<String> =
                    chunk.iter().map(|m| self.directory_object_ref(m)).collect();
                let body = json!({ "members@odata.bind": refs });
                self.send_no_content(Method::PATCH, &format!("groups/{id}"), Some(&body))
                    .await?;
            }
            Ok(())
        })
        .await
    }

    async fn remove_group_members(&self, id: &str, member_ids: &[String]) -> GraphResult<()> {
        self.observe(
            "group",
            "remove_members",
            id,
            self.remove_references(&format!("groups/{id}/members"), member_ids),
        )
        .await
    }
}

#[async_trait]
impl UsersApi for GraphClient {
    async fn get_user(&self, id: &str) -> GraphResult<User> {
        self.observe("user", "get", id, self.get_json(&format!("users/{id}")))
            .await
    }

    async fn create_user(&self, user: &User) -> GraphResult<User> {
        let upn = user.user_principal_name.clone().unwrap_or_default();
        self.observe("user", "create", &upn, async {
            let body = to_body(user)?;
            self.post_json("users", &body).await
        })
        .await
    }

    async fn update_user(&self, id: &str, patch: &User) -> GraphResult<()> {
        self.observe("user", "update", id, async {
            let body = to_body(patch)?;
            self.send_no_content(Method::PATCH, &format!("users/{id}"), Some(&body))
                .await
        })
        .await
    }

    async fn delete_user(&self, id: &str) -> GraphResult<()> {
        self.observe(
            "user",
            "delete",
            id,
            self.send_no_content(Method::DELETE, &format!("users/{id}"), None),
        )
        .await
    }

    async fn list_users(&self, filter: Option<&str>) -> GraphResult<Vec<User>> {
        self.observe(
            "user",
            "list",
            filter.unwrap_or_default(),
            self.list_paged("users", &filter_query(filter)),
        )
        .await
    }
}

#[async_trait]
impl DomainsApi for GraphClient {
    async fn list_domains(&self) -> GraphResult<Vec<Domain>> {
        self.observe("domain", "list", "", self.list_paged("domains", &[]))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_retry_after_is_capped() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("86400"));
        assert_eq!(
            retry_after(&headers),
            Some(Duration::from_millis(DEFAULT_HTTP_RETRY_MAX_MS))
        );

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_urls() {
        let client = GraphClient::with_base_url(
            "https://graph.microsoft.com/v1.0/",
            TokenSource::fixed("test-token"),
        )
        .unwrap();
        assert_eq!(client.base_url(), "https://graph.microsoft.com/v1.0");
        assert_eq!(
            client.url("/applications/abc"),
            "https://graph.microsoft.com/v1.0/applications/abc"
        );
        assert_eq!(
            client.directory_object_ref("u-1"),
            "https://graph.microsoft.com/v1.0/directoryObjects/u-1"
        );
    }

    #[test]
    fn test_filter_query() {
        assert!(filter_query(None).is_empty());
        assert_eq!(
            filter_query(Some("displayName eq 'x'")),
            vec![("$filter", "displayName eq 'x'")]
        );
    }
}

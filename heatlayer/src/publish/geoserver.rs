//! GeoServer REST client.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{LayerTarget, MapServer, MapServerError, PublishOutcome, UpsertAction};
use crate::raster::xml_escape;

const XML: &str = "application/xml";

/// HTTP client for GeoServer's REST configuration API.
#[derive(Debug, Clone)]
pub struct GeoServerClient {
    base_url: String,
    username: String,
    password: String,
    client: Client,
}

impl GeoServerClient {
    /// Creates a client for `base_url` (e.g. `http://geoserver:8080/geoserver`).
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MapServerError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MapServerError::Connectivity {
                url: base_url.clone(),
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            base_url,
            username: username.into(),
            password: password.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn rest(&self, path: &str) -> String {
        format!("{}/rest/{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.username, Some(&self.password))
    }

    fn unreachable(&self, e: reqwest::Error) -> MapServerError {
        MapServerError::Connectivity {
            url: self.base_url.clone(),
            message: e.to_string(),
        }
    }

    async fn failure(&self, operation: &'static str, response: Response) -> MapServerError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            MapServerError::Connectivity {
                url: self.base_url.clone(),
                message: format!("{} returned HTTP {}: {}", operation, status.as_u16(), body),
            }
        } else {
            MapServerError::Rejected {
                operation,
                status: status.as_u16(),
                body,
            }
        }
    }

    /// True when a GET for `path` succeeds, false on 404.
    async fn exists(&self, operation: &'static str, path: &str) -> Result<bool, MapServerError> {
        let response = self
            .authed(self.client.get(self.rest(path)))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(self.failure(operation, response).await),
        }
    }

    /// Current configuration at `path`, or `None` on 404.
    ///
    /// An unreadable body yields `Value::Null`, which matches no expected
    /// field and so gets the resource rewritten.
    async fn fetch(&self, operation: &'static str, path: &str) -> Result<Option<Value>, MapServerError> {
        let response = self
            .authed(self.client.get(self.rest(path)))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        match response.status() {
            s if s.is_success() => {
                let body = response.text().await.map_err(|e| self.unreachable(e))?;
                Ok(Some(serde_json::from_str(&body).unwrap_or(Value::Null)))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(self.failure(operation, response).await),
        }
    }

    async fn send_xml(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
        body: String,
    ) -> Result<(), MapServerError> {
        let response = self
            .authed(builder)
            .header(CONTENT_TYPE, XML)
            .body(body)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.failure(operation, response).await)
        }
    }

    /// Whether the REST API answers.
    pub async fn is_ready(&self) -> bool {
        match self
            .authed(self.client.get(self.rest("about/version.json")))
            .send()
            .await
        {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                debug!(error = %e, "GeoServer not ready");
                false
            }
        }
    }

    /// Polls [`is_ready`](Self::is_ready) until it succeeds or `timeout` elapses.
    pub async fn wait_until_ready(&self, timeout: Duration, poll: Duration) -> Result<(), MapServerError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_ready().await {
                info!(url = %self.base_url, "GeoServer is ready");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(MapServerError::Connectivity {
                    url: self.base_url.clone(),
                    message: format!("not ready after {:?}", timeout),
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn create_workspace_if_missing(&self, workspace: &str) -> Result<(), MapServerError> {
        if self
            .exists("get workspace", &format!("workspaces/{}", workspace))
            .await?
        {
            debug!(workspace, "Workspace exists");
            return Ok(());
        }
        let body = format!(
            "<workspace><name>{}</name></workspace>",
            xml_escape(workspace)
        );
        self.send_xml("create workspace", self.client.post(self.rest("workspaces")), body)
            .await?;
        info!(workspace, "Workspace created");
        Ok(())
    }

    async fn upsert_store(&self, target: &LayerTarget) -> Result<UpsertAction, MapServerError> {
        let stores = format!("workspaces/{}/coveragestores", target.workspace);
        let store_path = format!("{}/{}", stores, target.store);
        let url = format!("file:{}", target.server_path);
        let body = format!(
            "<coverageStore><name>{}</name><workspace><name>{}</name></workspace>\
             <enabled>true</enabled><type>GeoTIFF</type><url>{}</url></coverageStore>",
            xml_escape(&target.store),
            xml_escape(&target.workspace),
            xml_escape(&url),
        );
        match self.fetch("get coverage store", &store_path).await? {
            Some(current) if store_matches(&current, &url) => Ok(UpsertAction::Unchanged),
            Some(_) => {
                self.send_xml("update coverage store", self.client.put(self.rest(&store_path)), body)
                    .await?;
                Ok(UpsertAction::Updated)
            }
            None => {
                self.send_xml("create coverage store", self.client.post(self.rest(&stores)), body)
                    .await?;
                Ok(UpsertAction::Created)
            }
        }
    }

    async fn upsert_coverage(&self, target: &LayerTarget) -> Result<UpsertAction, MapServerError> {
        let coverages = format!(
            "workspaces/{}/coveragestores/{}/coverages",
            target.workspace, target.store
        );
        let coverage_path = format!("{}/{}", coverages, target.layer);
        let body = format!(
            "<coverage><name>{}</name><title>{}</title><enabled>true</enabled></coverage>",
            xml_escape(&target.layer),
            xml_escape(&target.title),
        );
        // The coverage follows its store's file, so only its own fields are compared.
        match self.fetch("get coverage", &coverage_path).await? {
            Some(current) if coverage_matches(&current, &target.title) => Ok(UpsertAction::Unchanged),
            Some(_) => {
                self.send_xml("update coverage", self.client.put(self.rest(&coverage_path)), body)
                    .await?;
                Ok(UpsertAction::Updated)
            }
            None => {
                self.send_xml("create coverage", self.client.post(self.rest(&coverages)), body)
                    .await?;
                Ok(UpsertAction::Created)
            }
        }
    }

    async fn publish(&self, target: &LayerTarget) -> Result<PublishOutcome, MapServerError> {
        let store = self.upsert_store(target).await?;
        let layer = self.upsert_coverage(target).await?;
        if layer == UpsertAction::Created {
            info!(layer = %target.qualified_name(), path = %target.server_path, "Layer published");
        } else {
            debug!(layer = %target.qualified_name(), ?store, "Layer refreshed");
        }
        if target.title.is_empty() {
            warn!(layer = %target.qualified_name(), "Layer has an empty title");
        }
        Ok(PublishOutcome { store, layer })
    }
}

fn store_matches(current: &Value, url: &str) -> bool {
    let store = &current["coverageStore"];
    store["url"] == url && store["enabled"] != false
}

fn coverage_matches(current: &Value, title: &str) -> bool {
    let coverage = &current["coverage"];
    coverage["title"] == title && coverage["enabled"] != false
}

impl MapServer for GeoServerClient {
    fn ensure_workspace<'a>(&'a self, workspace: &'a str) -> BoxFuture<'a, Result<(), MapServerError>> {
        Box::pin(self.create_workspace_if_missing(workspace))
    }

    fn upsert_layer<'a>(&'a self, target: &'a LayerTarget) -> BoxFuture<'a, Result<PublishOutcome, MapServerError>> {
        Box::pin(self.publish(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_store_matches_url_and_enabled() {
        let current = json!({"coverageStore": {"name": "s", "url": "file:/srv/a.tif", "enabled": true}});
        assert!(store_matches(&current, "file:/srv/a.tif"));
        assert!(!store_matches(&current, "file:/srv/b.tif"));
        let disabled = json!({"coverageStore": {"url": "file:/srv/a.tif", "enabled": false}});
        assert!(!store_matches(&disabled, "file:/srv/a.tif"));
        assert!(!store_matches(&Value::Null, "file:/srv/a.tif"));
    }

    #[test]
    fn test_coverage_matches_title() {
        let current = json!({"coverage": {"name": "ndvi", "title": "NDVI Brussels 2024"}});
        assert!(coverage_matches(&current, "NDVI Brussels 2024"));
        assert!(!coverage_matches(&current, "NDVI Brussels 2025"));
    }
}

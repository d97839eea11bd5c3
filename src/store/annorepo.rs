//! AnnoRepo client
//!
//! Talks to an AnnoRepo instance (a W3C Web Annotation Protocol server):
//! - content and linking lookups through the container's custom queries,
//!   whose parameters are base64 encoded
//! - create through the W3C container endpoint
//! - update/delete guarded by `If-Match` with the annotation's ETag

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, ETAG, IF_MATCH};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::error::StoreError;
use super::traits::RelationshipStore;
use super::types::{BulkBatch, ContentPage, LoadMode, Versioned};
use crate::annotations::{icon_states, ContentAnnotation, LinkingAnnotation, LINKING_MOTIVATION};

const ANNOTATION_MEDIA_TYPE: &str = "application/ld+json; profile=\"http://www.w3.org/ns/anno.jsonld\"";

/// Concurrent per-id linking lookups
const LOOKUP_CONCURRENCY: usize = 8;

/// Connection settings for an AnnoRepo container
#[derive(Debug, Clone)]
pub struct AnnoRepoConfig {
    pub base_url: String,
    pub container: String,
    /// Bearer token; writes are refused without one
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AnnoRepoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://annorepo.globalise.huygens.knaw.nl".to_string(),
            container: "necessary-reunions".to_string(),
            token: None,
            timeout_secs: 10,
        }
    }
}

/// An `AnnotationPage` as returned by AnnoRepo custom queries
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotationPage {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    next: Option<Value>,
    #[serde(default)]
    start_index: Option<usize>,
    #[serde(default)]
    part_of: Option<PartOf>,
}

#[derive(Debug, Deserialize)]
struct PartOf {
    #[serde(default)]
    total: Option<usize>,
}

impl AnnotationPage {
    fn has_more(&self) -> bool {
        matches!(self.next, Some(Value::String(_)))
    }
}

/// Encode a custom query parameter value the way AnnoRepo expects
fn encode_param(value: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(value);
    urlencoding::encode(&encoded).into_owned()
}

fn is_linking(item: &Value) -> bool {
    item.get("motivation").and_then(Value::as_str) == Some(LINKING_MOTIVATION)
}

/// Decode page items, skipping (and logging) any that do not parse
fn decode_items<T: for<'de> Deserialize<'de>>(items: Vec<Value>) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable annotation");
                None
            }
        })
        .collect()
}

/// [`RelationshipStore`] backed by AnnoRepo
pub struct AnnoRepoStore {
    client: Client,
    config: AnnoRepoConfig,
}

impl AnnoRepoStore {
    pub fn new(config: AnnoRepoConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn services_url(&self) -> String {
        format!(
            "{}/services/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.container
        )
    }

    fn container_url(&self) -> String {
        format!(
            "{}/w3c/{}/",
            self.config.base_url.trim_end_matches('/'),
            self.config.container
        )
    }

    fn with_target_url(&self, target: &str, page: u32) -> String {
        format!(
            "{}/custom-query/with-target:target={}?page={}",
            self.services_url(),
            encode_param(target),
            page
        )
    }

    /// Linking annotations for one target; an empty target lists all of them
    fn linking_url(&self, target: &str, page: u32) -> String {
        let target = if target.is_empty() {
            String::new()
        } else {
            encode_param(target)
        };
        format!(
            "{}/custom-query/with-target-and-motivation-or-purpose:target={},motivationorpurpose={}?page={}",
            self.services_url(),
            target,
            encode_param(LINKING_MOTIVATION),
            page
        )
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, StoreError> {
        match &self.config.token {
            Some(token) => Ok(request.bearer_auth(token)),
            None => Err(StoreError::Unauthorized(
                "no AnnoRepo token configured".to_string(),
            )),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout(self.config.timeout_secs)
            } else {
                StoreError::from(e)
            }
        })
    }

    async fn fetch_page(&self, url: &str) -> Result<AnnotationPage, StoreError> {
        tracing::debug!(url = %url, "Fetching annotation page");
        let response = self.send(self.client.get(url).header(ACCEPT, ANNOTATION_MEDIA_TYPE)).await?;
        let response = ensure_success(response).await?;
        Ok(response.json::<AnnotationPage>().await?)
    }

    /// ETag a conditional write must match: the caller's, or the current one
    async fn write_etag(&self, id: &str, expected_version: Option<&str>) -> Result<String, StoreError> {
        match expected_version {
            Some(version) => Ok(version.to_string()),
            None => self.fetch_etag(id).await,
        }
    }

    /// Current ETag for an annotation
    async fn fetch_etag(&self, id: &str) -> Result<String, StoreError> {
        let response = self.send(self.client.get(id).header(ACCEPT, ANNOTATION_MEDIA_TYPE)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let response = ensure_success(response).await?;
        etag(response.headers()).ok_or_else(|| StoreError::Status {
            status: response.status().as_u16(),
            message: format!("no ETag returned for {}", id),
        })
    }

    async fn linking_for_target(&self, target: &str) -> Result<Vec<LinkingAnnotation>, StoreError> {
        let mut found = Vec::new();
        let mut page = 0;
        loop {
            let result = self.fetch_page(&self.linking_url(target, page)).await?;
            let has_more = result.has_more();
            found.extend(decode_items::<LinkingAnnotation>(result.items));
            if !has_more {
                return Ok(found);
            }
            page += 1;
        }
    }
}

fn etag(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn ensure_success(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        StatusCode::PRECONDITION_FAILED => StoreError::PreconditionFailed(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized(message),
        _ => StoreError::Status {
            status: status.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl RelationshipStore for AnnoRepoStore {
    async fn list_content_page(&self, canvas_id: &str, page: u32) -> Result<ContentPage, StoreError> {
        let result = self.fetch_page(&self.with_target_url(canvas_id, page)).await?;
        let has_more = result.has_more();
        let content: Vec<Value> = result.items.into_iter().filter(|i| !is_linking(i)).collect();
        let items = decode_items::<ContentAnnotation>(content)
            .into_iter()
            .map(|a| {
                let version = a.version_stamp().map(str::to_owned);
                Versioned::new(a, version)
            })
            .collect();
        Ok(ContentPage { items, has_more })
    }

    async fn list_linking_for_targets(&self, ids: &[String]) -> Result<Vec<LinkingAnnotation>, StoreError> {
        let unique: Vec<String> = {
            let mut seen = HashSet::new();
            ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect()
        };

        let per_target: Vec<Vec<LinkingAnnotation>> = stream::iter(unique)
            .map(|id| async move { self.linking_for_target(&id).await })
            .buffer_unordered(LOOKUP_CONCURRENCY)
            .try_collect()
            .await?;

        let mut seen = HashSet::new();
        Ok(per_target
            .into_iter()
            .flatten()
            .filter(|l| seen.insert(l.id.clone()))
            .collect())
    }

    async fn list_linking_batch(&self, mode: LoadMode, batch: u32) -> Result<BulkBatch, StoreError> {
        let result = self.fetch_page(&self.linking_url("", batch)).await?;
        let has_more = result.has_more();
        let start_index = result.start_index;
        let reported_total = result.part_of.as_ref().and_then(|p| p.total);
        let annotations = decode_items::<LinkingAnnotation>(result.items);
        let seen_so_far = start_index.unwrap_or(0) + annotations.len();

        Ok(BulkBatch {
            icon_states: icon_states(&annotations),
            processed_annotations: annotations.len(),
            total_annotations: reported_total.unwrap_or(seen_so_far).max(seen_so_far),
            annotations,
            has_more,
            next_batch: has_more.then_some(batch + 1),
            mode,
        })
    }

    async fn content_exists(&self, id: &str) -> Result<bool, StoreError> {
        let response = self.send(self.client.head(id).header(ACCEPT, ANNOTATION_MEDIA_TYPE)).await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(false),
            _ => ensure_success(response).await.map(|_| true),
        }
    }

    async fn get_linking(&self, id: &str) -> Result<Option<Versioned<LinkingAnnotation>>, StoreError> {
        let response = self.send(self.client.get(id).header(ACCEPT, ANNOTATION_MEDIA_TYPE)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response).await?;
        let version = etag(response.headers());
        let annotation = response.json::<LinkingAnnotation>().await?;
        Ok(Some(Versioned::new(annotation, version)))
    }

    async fn create_linking(&self, annotation: &LinkingAnnotation) -> Result<LinkingAnnotation, StoreError> {
        let mut payload = serde_json::to_value(annotation)?;
        let mut request = self
            .client
            .post(self.container_url())
            .header(CONTENT_TYPE, ANNOTATION_MEDIA_TYPE);

        // Locally minted ids become the slug; AnnoRepo assigns the final IRI
        if let Some(slug) = annotation.id.strip_prefix("urn:uuid:") {
            request = request.header("Slug", slug);
            if let Some(object) = payload.as_object_mut() {
                object.remove("id");
            }
        }

        let response = self.send(self.authorized(request)?.json(&payload)).await?;
        let response = ensure_success(response).await?;
        let created = response.json::<LinkingAnnotation>().await?;
        tracing::info!(linking_id = %created.id, targets = created.target.len(), "Created linking annotation");
        Ok(created)
    }

    async fn update_linking(
        &self,
        annotation: &LinkingAnnotation,
        expected_version: Option<&str>,
    ) -> Result<LinkingAnnotation, StoreError> {
        let etag = self.write_etag(&annotation.id, expected_version).await?;
        let request = self
            .client
            .put(&annotation.id)
            .header(CONTENT_TYPE, ANNOTATION_MEDIA_TYPE)
            .header(IF_MATCH, etag);
        let response = self.send(self.authorized(request)?.json(annotation)).await?;
        let response = ensure_success(response).await?;

        // Some deployments answer 204; fall back to what we sent
        let updated = match response.json::<LinkingAnnotation>().await {
            Ok(updated) => updated,
            Err(_) => annotation.clone(),
        };
        tracing::info!(linking_id = %updated.id, targets = updated.target.len(), "Updated linking annotation");
        Ok(updated)
    }

    async fn delete_linking(&self, id: &str, expected_version: Option<&str>) -> Result<(), StoreError> {
        let etag = self.write_etag(id, expected_version).await?;
        let request = self.client.delete(id).header(IF_MATCH, etag);
        let response = self.send(self.authorized(request)?).await?;
        ensure_success(response).await?;
        tracing::info!(linking_id = %id, "Deleted linking annotation");
        Ok(())
    }
}

//! Geotag search providers
//!
//! One implementation per upstream: Nominatim, the NeRu place dataset, the
//! GAVOC thesaurus and GLOBALISE place features. Providers return raw hits
//! already wrapped as [`SearchResult`]s; timeouts are applied by the caller.

use async_trait::async_trait;
use reqwest::header::ACCEPT_LANGUAGE;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::normalize::to_search_result;
use super::types::{
    GavocConcept, GeotagError, GeotagSource, GlobaliseFeature, NeruPlace, NominatimPlace,
    ProviderKind, SearchResult,
};

/// Geotag provider trait
#[async_trait]
pub trait GeotagProvider: Send + Sync {
    /// Which upstream this is
    fn kind(&self) -> ProviderKind;

    /// Search for places matching `query`, at most `limit` hits
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, GeotagError>;
}

async fn get_json<T: for<'de> Deserialize<'de>>(
    request: reqwest::RequestBuilder,
    provider: &str,
) -> Result<T, GeotagError> {
    let response = request
        .send()
        .await
        .map_err(|e| GeotagError::Provider(format!("Failed to call {}: {}", provider, e)))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(GeotagError::Provider(format!(
            "{} returned {}: {}",
            provider, status, body
        )));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| GeotagError::Provider(format!("Failed to parse {} response: {}", provider, e)))
}

/// OpenStreetMap Nominatim
pub struct NominatimProvider {
    client: Client,
    base_url: String,
}

impl NominatimProvider {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GeotagProvider for NominatimProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gazetteer
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, GeotagError> {
        let url = format!(
            "{}/search?format=json&limit={}&q={}",
            self.base_url,
            limit,
            urlencoding::encode(query)
        );
        let places: Vec<NominatimPlace> =
            get_json(self.client.get(&url).header(ACCEPT_LANGUAGE, "en"), "Nominatim").await?;

        Ok(places
            .into_iter()
            .take(limit)
            .map(|p| to_search_result(GeotagSource::Gazetteer(p)))
            .collect())
    }
}

/// NeRu place dataset, fetched once and searched locally
pub struct NeruProvider {
    client: Client,
    dataset_url: String,
    dataset: OnceCell<Vec<NeruPlace>>,
}

impl NeruProvider {
    pub fn new(client: Client, dataset_url: &str) -> Self {
        Self {
            client,
            dataset_url: dataset_url.to_string(),
            dataset: OnceCell::new(),
        }
    }

    /// Provider over an already loaded dataset
    pub fn with_dataset(client: Client, places: Vec<NeruPlace>) -> Self {
        Self {
            client,
            dataset_url: String::new(),
            dataset: OnceCell::from(places),
        }
    }

    async fn dataset(&self) -> Result<&Vec<NeruPlace>, GeotagError> {
        self.dataset
            .get_or_try_init(|| async {
                let places: Vec<NeruPlace> = get_json(self.client.get(&self.dataset_url), "NeRu dataset").await?;
                tracing::info!(places = places.len(), "Loaded NeRu place dataset");
                Ok::<_, GeotagError>(places)
            })
            .await
    }
}

#[async_trait]
impl GeotagProvider for NeruProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::NamedEntity
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, GeotagError> {
        let dataset = self.dataset().await?;
        Ok(dataset
            .iter()
            .filter(|place| place.matches(query))
            .take(limit)
            .map(|place| to_search_result(GeotagSource::NamedEntity(place.clone())))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct GavocResponse {
    #[serde(default)]
    concepts: Vec<GavocConcept>,
}

/// GAVOC historical atlas thesaurus
pub struct GavocProvider {
    client: Client,
    base_url: String,
}

impl GavocProvider {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GeotagProvider for GavocProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Thesaurus
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, GeotagError> {
        let url = format!(
            "{}/api/gavoc/concepts?search={}&coordinates=true&limit={}",
            self.base_url,
            urlencoding::encode(query),
            limit
        );
        let response: GavocResponse = get_json(self.client.get(&url), "GAVOC").await?;

        Ok(response
            .concepts
            .into_iter()
            .filter(|c| c.coordinates.is_some())
            .take(limit)
            .map(|c| to_search_result(GeotagSource::Thesaurus(c)))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct GlobaliseResponse {
    #[serde(default)]
    features: Vec<GlobaliseFeature>,
}

/// GLOBALISE place features
pub struct GlobaliseProvider {
    client: Client,
    base_url: String,
}

impl GlobaliseProvider {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GeotagProvider for GlobaliseProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::External
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, GeotagError> {
        let url = format!(
            "{}/api/globalise/local-places?name={}",
            self.base_url,
            urlencoding::encode(query)
        );
        let response: GlobaliseResponse = get_json(self.client.get(&url), "GLOBALISE").await?;

        Ok(response
            .features
            .into_iter()
            .take(limit)
            .map(|f| to_search_result(GeotagSource::External(f)))
            .collect())
    }
}

/// Fixed-response provider for testing
#[cfg(test)]
pub struct MockProvider {
    pub kind: ProviderKind,
    pub results: Vec<SearchResult>,
    pub delay: Option<std::time::Duration>,
    pub fail: bool,
}

#[cfg(test)]
#[async_trait]
impl GeotagProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<SearchResult>, GeotagError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(GeotagError::Provider("Mock failure".to_string()));
        }
        Ok(self.results.iter().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset() -> Vec<NeruPlace> {
        serde_json::from_value(json!([
            {
                "id": "https://id.example/place/1",
                "type": "Place",
                "_label": "Cochin",
                "glob_id": "G1",
                "classified_as": [],
                "identified_by": [
                    { "type": "Name", "content": "Kochi" },
                    { "type": "Identifier", "content": "kochi-id" }
                ],
                "defined_by": "POINT (76.26 9.93)"
            },
            {
                "id": "https://id.example/place/2",
                "type": "Place",
                "_label": "Calicut",
                "glob_id": "G2",
                "identified_by": [],
                "defined_by": "POINT (75.78 11.25)"
            }
        ]))
        .unwrap()
    }

    #[tokio::test]
    async fn test_neru_matches_label_and_alternative_names() {
        let provider = NeruProvider::with_dataset(Client::new(), dataset());

        let by_label = provider.search("calic", 10).await.unwrap();
        assert_eq!(by_label.len(), 1);
        assert_eq!(by_label[0].display_name, "Calicut");

        let by_name = provider.search("KOCHI", 10).await.unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].coordinates, Some([76.26, 9.93]));
        assert_eq!(by_name[0].source, ProviderKind::NamedEntity);
    }

    #[tokio::test]
    async fn test_neru_identifiers_are_not_names() {
        let provider = NeruProvider::with_dataset(Client::new(), dataset());
        assert!(provider.search("kochi-id", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_neru_respects_limit() {
        let provider = NeruProvider::with_dataset(Client::new(), dataset());
        assert_eq!(provider.search("c", 1).await.unwrap().len(), 1);
    }

    #[test]
    fn test_gavoc_response_decodes_concepts() {
        let response: GavocResponse = serde_json::from_value(json!({
            "concepts": [
                { "id": "1", "preferredTerm": "Ceylon", "alternativeTerms": [], "category": "island",
                  "coordinates": { "latitude": 7.8, "longitude": 80.7 }, "uri": "https://example.org/gavoc/1" },
                { "id": "2", "preferredTerm": "Nowhere", "category": "unknown" }
            ],
            "total": 2
        }))
        .unwrap();
        assert_eq!(response.concepts.len(), 2);
        assert!(response.concepts[1].coordinates.is_none());
    }
}

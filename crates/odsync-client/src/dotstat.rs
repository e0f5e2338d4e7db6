//! Client for the .Stat Data Explorer search service and SDMX REST API.
//!
//! Two search endpoints are used: `/api/config` returns the facet tree, and
//! `/api/search` returns the dataflows filed under one facet value.

use odsync_core::models::{Dataflow, FacetTree};
use odsync_core::{AppError, UpstreamSource};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::http::{HttpExecutor, json};

/// Accept header for SDMX CSV exports, with both codes and labels.
const SDMX_CSV: &str = "application/vnd.sdmx.data+csv;urn=true;file=true;labels=both";

/// Maximum dataflows returned for one topic.
const SEARCH_ROWS: u32 = 10_000;

const SEARCH_SORT: &str = "score desc, sname asc, indexationDate desc";

/// Connection settings for a .Stat instance.
#[derive(Debug, Clone)]
pub struct DotStatConfig {
    /// Data Explorer base URL, e.g. `https://lustat.statec.lu`.
    pub base_url: String,
    /// Search language, e.g. `fr`.
    pub lang: String,
    pub datasource_id: String,
    /// Facet holding the topic tree.
    pub main_facet: String,
    pub tenant: String,
    /// SDMX agency owning the dataflows, used for CSV exports.
    pub agency: String,
}

#[derive(Deserialize, Debug)]
struct SearchResponse {
    #[serde(default)]
    dataflows: Vec<Dataflow>,
}

/// HTTP client for a .Stat Data Explorer instance.
///
/// # Examples
///
/// ```no_run
/// use odsync_client::{DotStatClient, DotStatConfig, HttpExecutor};
/// use odsync_core::{HttpConfig, Throttle, UpstreamSource};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let http = HttpExecutor::new(HttpConfig::default(), Throttle::new(10, std::time::Duration::from_secs(1)))?;
/// let client = DotStatClient::new(http, DotStatConfig {
///     base_url: "https://lustat.statec.lu".to_string(),
///     lang: "fr".to_string(),
///     datasource_id: "ds-release".to_string(),
///     main_facet: "Thème".to_string(),
///     tenant: "default".to_string(),
///     agency: "LU1".to_string(),
/// })?;
/// let tree = client.fetch_facet_tree().await?;
/// println!("{} facets", tree.facets.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DotStatClient {
    http: HttpExecutor,
    base_url: String,
    config: DotStatConfig,
}

impl DotStatClient {
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if the base URL is malformed.
    pub fn new(http: HttpExecutor, config: DotStatConfig) -> Result<Self, AppError> {
        Url::parse(&config.base_url)
            .map_err(|_| AppError::InvalidUrl(config.base_url.clone()))?;
        let base_url = config.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        let raw = format!("{}/{}", self.base_url, path);
        Url::parse(&raw).map_err(|_| AppError::InvalidUrl(raw))
    }
}

impl UpstreamSource for DotStatClient {
    async fn fetch_facet_tree(&self) -> Result<FacetTree, AppError> {
        let url = self.endpoint("api/config")?;
        let body = json!({
            "lang": self.config.lang,
            "facets": { "datasourceId": [self.config.datasource_id] },
        });

        let resp = self
            .http
            .send(|client| client.post(url.clone()).json(&body))
            .await?;
        json(resp).await
    }

    async fn fetch_topic_resources(&self, topic: &str) -> Result<Vec<Dataflow>, AppError> {
        let mut url = self.endpoint("api/search")?;
        url.query_pairs_mut().append_pair("tenant", &self.config.tenant);

        let mut facets = serde_json::Map::new();
        facets.insert(self.config.main_facet.clone(), json!([topic]));
        facets.insert(
            "datasourceId".to_string(),
            json!([self.config.datasource_id]),
        );
        let body = json!({
            "lang": self.config.lang,
            "search": "",
            "facets": facets,
            "rows": SEARCH_ROWS,
            "start": 0,
            "sort": SEARCH_SORT,
        });

        match self
            .http
            .send(|client| client.post(url.clone()).json(&body))
            .await
        {
            Ok(resp) => Ok(json::<SearchResponse>(resp).await?.dataflows),
            // Restricted topics are skipped, not failed.
            Err(e) if e.is_forbidden() => {
                tracing::debug!(topic, "Topic access restricted, no dataflows");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_csv(&self, dataflow_id: &str) -> Result<String, AppError> {
        let mut url = self.endpoint(&format!(
            "rest/data/{},{}/all",
            self.config.agency, dataflow_id
        ))?;
        url.query_pairs_mut()
            .append_pair("dimensionAtObservation", "AllDimensions");

        let resp = self
            .http
            .send(|client| {
                client
                    .get(url.clone())
                    .header(ACCEPT, SDMX_CSV)
                    .header(ACCEPT_LANGUAGE, &self.config.lang)
            })
            .await?;
        resp.text()
            .await
            .map_err(|e| AppError::ClientError(e.to_string()))
    }
}

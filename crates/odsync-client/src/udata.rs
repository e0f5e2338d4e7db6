//! Client for the udata catalog API (v1).
//!
//! Every request carries the `X-API-KEY` header. Dataset listings are paginated
//! and followed through their `next_page` links.

use odsync_core::models::{
    DatasetUpdate, DestinationDataset, NewDatasetPayload, NewResource, ResourceUpdate,
};
use odsync_core::{AppError, DestinationCatalog};
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use url::Url;

use crate::http::{HttpExecutor, json};

const API_KEY_HEADER: &str = "X-API-KEY";

/// Connection settings for a udata instance.
#[derive(Debug, Clone)]
pub struct UdataConfig {
    /// API root, e.g. `https://data.public.lu/api/1`.
    pub base_url: String,
    pub api_key: String,
    /// Organization owning the managed datasets.
    pub organization_id: String,
    /// Tag marking a dataset as managed by the sync.
    pub sync_tag: String,
    pub page_size: u32,
}

impl UdataConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        organization_id: impl Into<String>,
        sync_tag: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            organization_id: organization_id.into(),
            sync_tag: sync_tag.into(),
            page_size: 100,
        }
    }
}

/// One page of a dataset listing.
#[derive(Deserialize, Debug)]
struct DatasetPage {
    #[serde(default)]
    data: Vec<DestinationDataset>,
    #[serde(default)]
    next_page: Option<String>,
}

/// Response of any create call; only the id is needed.
#[derive(Deserialize, Debug)]
struct Created {
    id: String,
}

/// HTTP client for a udata catalog.
#[derive(Clone)]
pub struct UdataClient {
    http: HttpExecutor,
    base_url: String,
    config: UdataConfig,
}

impl UdataClient {
    /// Safety net against a server whose `next_page` never ends.
    const MAX_PAGES: usize = 1000;

    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if the base URL is malformed.
    pub fn new(http: HttpExecutor, config: UdataConfig) -> Result<Self, AppError> {
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

    fn request(&self, client: &Client, method: Method, url: &Url) -> RequestBuilder {
        client
            .request(method, url.clone())
            .header(ACCEPT, "application/json")
            .header(API_KEY_HEADER, &self.config.api_key)
    }

    /// Follows `next_page` links from `first` and collects every dataset.
    async fn list_paginated(&self, first: Url) -> Result<Vec<DestinationDataset>, AppError> {
        let mut datasets = Vec::new();
        let mut next = Some(first);
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > Self::MAX_PAGES {
                return Err(AppError::Generic(format!(
                    "Dataset listing exceeded {} pages",
                    Self::MAX_PAGES
                )));
            }

            let resp = self
                .http
                .send(|client| self.request(client, Method::GET, &url))
                .await?;
            let page: DatasetPage = json(resp).await?;
            tracing::debug!(page = pages, count = page.data.len(), "Fetched dataset page");
            datasets.extend(page.data);

            next = match page.next_page {
                Some(link) => {
                    Some(Url::parse(&link).map_err(|_| AppError::InvalidUrl(link.clone()))?)
                }
                None => None,
            };
        }

        Ok(datasets)
    }

    fn listing_url(&self, tag: Option<&str>) -> Result<Url, AppError> {
        let mut url = self.endpoint("datasets/")?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(tag) = tag {
                pairs.append_pair("tag", tag);
            }
            pairs
                .append_pair("organization", &self.config.organization_id)
                .append_pair("page", "1")
                .append_pair("page_size", &self.config.page_size.to_string());
        }
        Ok(url)
    }
}

impl DestinationCatalog for UdataClient {
    async fn list_managed_datasets(&self) -> Result<Vec<DestinationDataset>, AppError> {
        let url = self.listing_url(Some(&self.config.sync_tag))?;
        self.list_paginated(url).await
    }

    async fn list_organization_datasets(&self) -> Result<Vec<DestinationDataset>, AppError> {
        let url = self.listing_url(None)?;
        self.list_paginated(url).await
    }

    async fn get_dataset(&self, id: &str) -> Result<DestinationDataset, AppError> {
        let url = self.endpoint(&format!("datasets/{}/", id))?;
        let resp = self
            .http
            .send(|client| self.request(client, Method::GET, &url))
            .await?;
        json(resp).await
    }

    async fn create_dataset(&self, payload: &NewDatasetPayload) -> Result<String, AppError> {
        let url = self.endpoint("datasets/")?;
        let resp = self
            .http
            .send(|client| self.request(client, Method::POST, &url).json(payload))
            .await?;
        Ok(json::<Created>(resp).await?.id)
    }

    async fn update_dataset(&self, id: &str, update: &DatasetUpdate) -> Result<(), AppError> {
        let url = self.endpoint(&format!("datasets/{}/", id))?;
        self.http
            .send(|client| self.request(client, Method::PUT, &url).json(update))
            .await?;
        Ok(())
    }

    async fn delete_dataset(&self, id: &str) -> Result<(), AppError> {
        let url = self.endpoint(&format!("datasets/{}/", id))?;
        self.http
            .send(|client| self.request(client, Method::DELETE, &url))
            .await?;
        Ok(())
    }

    async fn create_resource(
        &self,
        dataset_id: &str,
        resource: &NewResource,
    ) -> Result<String, AppError> {
        let url = self.endpoint(&format!("datasets/{}/resources/", dataset_id))?;
        let resp = self
            .http
            .send(|client| self.request(client, Method::POST, &url).json(resource))
            .await?;
        Ok(json::<Created>(resp).await?.id)
    }

    async fn update_resource(
        &self,
        dataset_id: &str,
        resource_id: &str,
        update: &ResourceUpdate,
    ) -> Result<(), AppError> {
        let url = self.endpoint(&format!(
            "datasets/{}/resources/{}/",
            dataset_id, resource_id
        ))?;
        self.http
            .send(|client| self.request(client, Method::PUT, &url).json(update))
            .await?;
        Ok(())
    }

    async fn delete_resource(&self, dataset_id: &str, resource_id: &str) -> Result<(), AppError> {
        let url = self.endpoint(&format!(
            "datasets/{}/resources/{}/",
            dataset_id, resource_id
        ))?;
        self.http
            .send(|client| self.request(client, Method::DELETE, &url))
            .await?;
        Ok(())
    }

    async fn reorder_resources(
        &self,
        dataset_id: &str,
        resource_ids: &[String],
    ) -> Result<(), AppError> {
        let url = self.endpoint(&format!("datasets/{}/resources/", dataset_id))?;
        self.http
            .send(|client| self.request(client, Method::PUT, &url).json(resource_ids))
            .await?;
        Ok(())
    }

    async fn upload_csv(
        &self,
        dataset_id: &str,
        filename: &str,
        content: String,
    ) -> Result<String, AppError> {
        let url = self.endpoint(&format!("datasets/{}/upload/", dataset_id))?;

        let resp = self
            .http
            .send(|client| {
                // udata derives the format from the file extension.
                let file = Part::text(content.clone()).file_name(filename.to_string());
                let form = Form::new()
                    .text("filename", filename.to_string())
                    .part("file", file);
                self.request(client, Method::POST, &url).multipart(form)
            })
            .await?;
        Ok(json::<Created>(resp).await?.id)
    }
}

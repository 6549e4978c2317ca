//! HTTP client for the Promptforge backend API.
//!
//! Thin typed wrapper over reqwest: auth header, JSON bodies, and contextual
//! errors carrying the HTTP status and a snippet of the response body.
//! No retries; callers see each request's outcome as-is.

use crate::model::{
    Dataset, DatasetEntry, EvalCriterion, GeneratedEntry, GuidanceTemplate, Project, RunConfig,
};
use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const BODY_SNIPPET_LEN: usize = 300;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: reqwest::Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct GuidanceCatalog {
    templates: Vec<GuidanceTemplate>,
    #[serde(default)]
    criteria: Vec<EvalCriterion>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed_entry: Option<&'a DatasetEntry>,
}

#[derive(Debug, Serialize)]
struct AppendRequest<'a> {
    entries: &'a [GeneratedEntry],
}

#[derive(Debug, Deserialize)]
struct AppendResponse {
    inserted: usize,
}

impl ApiClient {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        let base_url = reqwest::Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base URL: {}", cfg.base_url))?;
        Ok(Self {
            http,
            base_url,
            token: cfg.token.clone(),
        })
    }

    fn url(&self, path: &str) -> Result<reqwest::Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid API path: {path}"))
    }

    async fn check<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(BODY_SNIPPET_LEN).collect();
            bail!("{what} failed: HTTP {status}: {snippet}");
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("{what}: malformed response body"))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T> {
        let resp = self
            .http
            .get(self.url(path)?)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("{what}: request failed"))?;
        Self::check(resp, what).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        what: &str,
    ) -> Result<T> {
        let resp = self
            .http
            .post(self.url(path)?)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("{what}: request failed"))?;
        Self::check(resp, what).await
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.get_json("/api/v1/projects", "listing projects").await
    }

    pub async fn list_datasets(&self, project_id: &str) -> Result<Vec<Dataset>> {
        self.get_json(
            &format!("/api/v1/projects/{project_id}/datasets"),
            "listing datasets",
        )
        .await
    }

    pub async fn list_entries(&self, dataset_id: &str, limit: usize) -> Result<Vec<DatasetEntry>> {
        self.get_json(
            &format!("/api/v1/datasets/{dataset_id}/entries?limit={limit}"),
            "listing dataset entries",
        )
        .await
    }

    /// Fetch the guidance template catalog together with the eval criteria
    /// the templates may reference.
    pub async fn list_guidance_templates(
        &self,
    ) -> Result<(Vec<GuidanceTemplate>, Vec<EvalCriterion>)> {
        let catalog: GuidanceCatalog = self
            .get_json("/api/v1/guidance-templates", "fetching guidance templates")
            .await?;
        Ok((catalog.templates, catalog.criteria))
    }

    /// One synthetic-generation call. This is the unit of work the engine
    /// pushes through the concurrency limiter.
    pub async fn generate_entry(
        &self,
        dataset_id: &str,
        prompt: &str,
        seed_entry: Option<&DatasetEntry>,
    ) -> Result<GeneratedEntry> {
        self.post_json(
            &format!("/api/v1/datasets/{dataset_id}/generate"),
            &GenerateRequest { prompt, seed_entry },
            "generating entry",
        )
        .await
    }

    pub async fn append_entries(
        &self,
        dataset_id: &str,
        entries: &[GeneratedEntry],
    ) -> Result<usize> {
        let resp: AppendResponse = self
            .post_json(
                &format!("/api/v1/datasets/{dataset_id}/entries"),
                &AppendRequest { entries },
                "appending entries",
            )
            .await?;
        Ok(resp.inserted)
    }
}

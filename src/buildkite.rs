//! Buildkite REST API v2 client

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::BuildkiteConfig;
use crate::error::{BotError, Result};
use crate::pipelines::Pipeline;
use crate::utils::{has_next_page, truncate_for_error};

const PIPELINES_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BuildAuthor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Body of `POST /pipelines/{slug}/builds`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BuildRequest {
    pub commit: String,
    pub branch: String,
    pub message: String,
    pub ignore_pipeline_branch_filters: bool,
    pub author: BuildAuthor,
    pub env: BTreeMap<String, String>,
}

/// Subset of a created build.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Build {
    pub web_url: String,
    pub number: u64,
    /// Timestamp exactly as Buildkite reported it.
    #[serde(default)]
    pub scheduled_at: Option<String>,
}

impl Build {
    pub fn scheduled_at_display(&self) -> &str {
        self.scheduled_at.as_deref().unwrap_or("unknown time")
    }
}

/// The CI side of the bot.
#[async_trait]
pub trait CiOrchestrator: Send + Sync {
    /// Organization slug, used for documentation paths.
    fn organization(&self) -> &str;

    /// Every pipeline of the organization, all pages.
    async fn list_pipelines(&self) -> Result<Vec<Pipeline>>;

    async fn create_build(&self, pipeline_slug: &str, request: &BuildRequest) -> Result<Build>;
}

#[derive(Clone)]
pub struct BuildkiteClient {
    http: reqwest::Client,
    api_base: String,
    organization: String,
}

impl BuildkiteClient {
    pub fn new(config: &BuildkiteConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("rocketbot"));
        let auth_header = format!("Bearer {}", config.token.trim());
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&auth_header)
                .map_err(|e| BotError::ConfigError(format!("invalid buildkite token: {e}")))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        Ok(Self {
            http,
            api_base: config.api_url.trim_end_matches('/').to_string(),
            organization: config.org_name.clone(),
        })
    }

    fn organization_url(&self, path: &str) -> String {
        format!(
            "{}/organizations/{}/{}",
            self.api_base, self.organization, path
        )
    }

    /// Sends the request and decodes a JSON body, returning the `Link` header alongside.
    async fn request_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(T, Option<String>)> {
        let response = request.send().await?;
        let status = response.status();
        let url = response.url().to_string();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(
                "buildkite request to {} failed with {}: {}",
                url,
                status,
                truncate_for_error(&body, 800)
            );
            return Err(BotError::Buildkite {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("application/json") {
            return Err(BotError::InvalidResponse(format!(
                "Invalid content-type. Expected application/json but received {content_type} in \"{url}\""
            )));
        }
        let link = response
            .headers()
            .get(header::LINK)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let text = response.text().await?;
        let body = serde_json::from_str(&text)
            .map_err(|e| BotError::InvalidResponse(format!("{e} in \"{url}\"")))?;
        Ok((body, link))
    }
}

#[async_trait]
impl CiOrchestrator for BuildkiteClient {
    fn organization(&self) -> &str {
        &self.organization
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        debug!("Reading pipelines");
        let url = self.organization_url("pipelines");
        let mut pipelines = Vec::new();
        let mut page = 1_u32;
        loop {
            let request = self.http.get(&url).query(&[
                ("page", page.to_string()),
                ("per_page", PIPELINES_PER_PAGE.to_string()),
            ]);
            let (chunk, link): (Vec<Pipeline>, _) = self.request_json(request).await?;
            pipelines.extend(chunk);
            if !has_next_page(link.as_deref()) {
                break;
            }
            page = page.saturating_add(1);
        }
        debug!("Read {} pipelines over {} page(s)", pipelines.len(), page);
        Ok(pipelines)
    }

    async fn create_build(&self, pipeline_slug: &str, request: &BuildRequest) -> Result<Build> {
        let url = self.organization_url(&format!("pipelines/{pipeline_slug}/builds"));
        let (build, _): (Build, _) = self.request_json(self.http.post(&url).json(request)).await?;
        info!("Started Buildkite build {}", build.web_url);
        Ok(build)
    }
}

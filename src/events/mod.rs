//! Per-event handling
//!
//! [`Bot::handle`] routes a decoded [`WebhookEvent`] to its handler and turns
//! the outcome into the JSON envelope returned to GitHub.

mod commented;
mod ping;
mod pr_opened;

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::BotConfig;
use crate::buildkite::{BuildkiteClient, CiOrchestrator};
use crate::comments::CleanupOutcome;
use crate::error::Result;
use crate::github::{GithubClient, SourceControl};
use crate::webhook::WebhookEvent;

pub use commented::CommentEvent;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BotResponse {
    pub success: bool,
    pub triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commented: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_comment_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BotResponse {
    /// Nothing to do for this event.
    pub fn ignored() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn not_commented() -> Self {
        Self {
            success: true,
            commented: Some(false),
            ..Self::default()
        }
    }

    pub fn commented(comment_url: String) -> Self {
        Self {
            success: true,
            commented: Some(true),
            comment_url: Some(comment_url),
            ..Self::default()
        }
    }

    pub fn triggered(updated_comment_url: String) -> Self {
        Self {
            success: true,
            triggered: true,
            commented: Some(false),
            updated_comment_url: Some(updated_comment_url),
            ..Self::default()
        }
    }

    pub fn acknowledged(message: String) -> Self {
        Self {
            success: true,
            commented: Some(false),
            message: Some(message),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct BotSettings {
    /// Base of human-facing GitHub links.
    pub web_url: String,
    pub collapse_old_comments: bool,
}

pub struct Bot {
    scm: Arc<dyn SourceControl>,
    ci: Arc<dyn CiOrchestrator>,
    settings: BotSettings,
}

impl Bot {
    pub fn new(
        scm: Arc<dyn SourceControl>,
        ci: Arc<dyn CiOrchestrator>,
        settings: BotSettings,
    ) -> Self {
        Self { scm, ci, settings }
    }

    /// Builds the GitHub and Buildkite clients once from `config`.
    pub fn from_config(config: &BotConfig) -> Result<Self> {
        let scm = GithubClient::new(&config.github)?;
        let ci = BuildkiteClient::new(&config.buildkite)?;
        Ok(Self::new(
            Arc::new(scm),
            Arc::new(ci),
            BotSettings {
                web_url: config.github.web_url.clone(),
                collapse_old_comments: config.github.collapse_old_comments,
            },
        ))
    }

    pub async fn handle(&self, event: WebhookEvent) -> Result<BotResponse> {
        match event {
            WebhookEvent::PullRequest(event) => pr_opened::handle(self, &event).await,
            WebhookEvent::IssueComment(event) => {
                self.handle_comment(CommentEvent::from_issue_comment(&event))
                    .await
            }
            WebhookEvent::PullRequestReviewComment(event) => {
                self.handle_comment(CommentEvent::from_review_comment(&event))
                    .await
            }
            WebhookEvent::Ping(event) => ping::handle(&event),
        }
    }

    async fn handle_comment(&self, event: CommentEvent<'_>) -> Result<BotResponse> {
        let (response, cleanup) = commented::handle(self, &event).await?;
        match cleanup {
            CleanupOutcome::Disabled => {}
            CleanupOutcome::Collapsed { node_ids } => {
                info!("Collapsed {} superseded comment(s)", node_ids.len())
            }
            CleanupOutcome::Failed(reason) => {
                warn!("Collapsing superseded comments failed: {}", reason)
            }
        }
        Ok(response)
    }
}

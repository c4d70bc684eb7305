//! Webhook related structures
//!
//! Only the fields the bot reads are modelled; everything else in GitHub's
//! payloads is ignored by serde.

use serde::Deserialize;

use crate::error::{BotError, Result};

pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Account {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: Account,
    #[serde(default)]
    pub ssh_url: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// Head or base side of a pull request.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BranchRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
    /// `null` when the fork the PR comes from was deleted.
    #[serde(default)]
    pub repo: Option<Repository>,
}

/// Pull request as embedded in webhook payloads and returned by `GET /pulls/{n}`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub html_url: String,
    pub head: BranchRef,
    pub base: BranchRef,
}

/// Issue or review comment, as delivered in events and returned on create/update.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Comment {
    pub id: u64,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub url: String,
    pub html_url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IssuePullRequestLink {
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Issue {
    pub number: u64,
    #[serde(default)]
    pub pull_request: Option<IssuePullRequestLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequest,
    pub repository: Repository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueCommentEvent {
    pub action: String,
    pub issue: Issue,
    pub comment: Comment,
    pub repository: Repository,
    pub sender: Account,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewCommentEvent {
    pub action: String,
    pub pull_request: PullRequest,
    pub comment: Comment,
    pub repository: Repository,
    pub sender: Account,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hook {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingRepository {
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    pub hook: Hook,
    #[serde(default)]
    pub repository: Option<PingRepository>,
}

/// Where a comment lives; decides which update endpoint applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentKind {
    Issue,
    Review,
}

/// Every webhook the bot understands, decoded once from the event header and body.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    PullRequest(PullRequestEvent),
    IssueComment(IssueCommentEvent),
    PullRequestReviewComment(ReviewCommentEvent),
    Ping(PingEvent),
}

impl WebhookEvent {
    /// Decodes `body` according to the `X-GitHub-Event` value `kind`.
    pub fn parse(kind: &str, body: &[u8]) -> Result<Self> {
        match kind {
            "pull_request" => decode(body).map(WebhookEvent::PullRequest),
            "issue_comment" => decode(body).map(WebhookEvent::IssueComment),
            "pull_request_review_comment" => {
                decode(body).map(WebhookEvent::PullRequestReviewComment)
            }
            "ping" => decode(body).map(WebhookEvent::Ping),
            other => Err(BotError::UnsupportedEvent(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::PullRequest(_) => "pull_request",
            WebhookEvent::IssueComment(_) => "issue_comment",
            WebhookEvent::PullRequestReviewComment(_) => "pull_request_review_comment",
            WebhookEvent::Ping(_) => "ping",
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| BotError::InvalidEventBody(e.to_string()))
}

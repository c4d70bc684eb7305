//! GitHub REST and GraphQL client

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::GithubConfig;
use crate::error::{BotError, Result};
use crate::github_auth::{Credentials, InstallationAuth};
use crate::utils::truncate_for_error;
use crate::webhook::{Comment, CommentKind, PullRequest, Repository};

const DEFAULT_RETRY_MAX_ATTEMPTS: usize = 4;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// How many of the latest PR comments are inspected when collapsing.
pub const RECENT_COMMENT_WINDOW: u32 = 10;

pub const COMMENTS_QUERY: &str = r#"
query($repoName: String!, $repoOwner: String!, $prNumber: Int!, $last: Int!) {
  self: viewer {
    login
  }
  comments: repository(name: $repoName, owner: $repoOwner) {
    pullRequest(number: $prNumber) {
      comments(last: $last) {
        nodes {
          id
          viewerDidAuthor
          editor {
            login
          }
          isMinimized
        }
      }
    }
  }
}
"#;

pub const MINIMIZE_MUTATION: &str = r#"
mutation($subjectId: ID!) {
  minimizeComment(input: { subjectId: $subjectId, classifier: OUTDATED }) {
    clientMutationId
  }
}
"#;

/// Entry of a repository directory listing.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ContentEntry {
    pub path: String,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UserProfile {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecentComment {
    /// GraphQL node id.
    pub id: String,
    pub viewer_did_author: bool,
    pub editor_login: Option<String>,
    pub is_minimized: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecentComments {
    /// Login of the account the bot authenticates as.
    pub viewer_login: String,
    pub comments: Vec<RecentComment>,
}

/// The source-control side of the bot.
#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn pull_request(&self, repository: &Repository, number: u64) -> Result<PullRequest>;

    /// Lists `path` at `git_ref`; `Ok(None)` when the path does not exist.
    async fn directory_listing(
        &self,
        repository: &Repository,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<ContentEntry>>>;

    async fn create_issue_comment(
        &self,
        repository: &Repository,
        issue_number: u64,
        body: &str,
    ) -> Result<Comment>;

    async fn update_comment(
        &self,
        repository: &Repository,
        kind: CommentKind,
        comment_id: u64,
        body: &str,
    ) -> Result<Comment>;

    async fn user(&self, login: &str) -> Result<UserProfile>;

    async fn recent_pr_comments(
        &self,
        repository: &Repository,
        pr_number: u64,
    ) -> Result<RecentComments>;

    async fn minimize_comment(&self, node_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    credentials: Credentials,
    api_base: String,
    graphql_url: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("rocketbot"));
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        let api_base = config.api_url.trim_end_matches('/').to_string();
        let credentials = match &config.app {
            Some(app) => {
                info!("Using GitHub App credentials (app {})", app.app_id);
                Credentials::App(Arc::new(InstallationAuth::new(http.clone(), &api_base, app)?))
            }
            None => {
                info!("Using GitHub token credentials");
                Credentials::token(&config.token)?
            }
        };
        Ok(Self {
            http,
            credentials,
            api_base,
            graphql_url: config.graphql_endpoint(),
            retry_max_attempts: if config.retry_failed_requests {
                DEFAULT_RETRY_MAX_ATTEMPTS
            } else {
                1
            },
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        })
    }

    /// Overrides the retry policy for GET requests; `max_attempts` of 1 disables retrying.
    pub fn with_retry_policy(mut self, max_attempts: usize, base_delay_ms: u64) -> Self {
        self.retry_max_attempts = max_attempts.max(1);
        self.retry_base_delay_ms = base_delay_ms;
        self
    }

    fn repo_url(&self, repository: &Repository, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, repository.owner.login, repository.name, path
        )
    }

    /// Sends a request, retrying transient failures only when `idempotent`.
    async fn send<F>(
        &self,
        operation: &str,
        idempotent: bool,
        mut request_builder: F,
    ) -> Result<reqwest::Response>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let max_attempts = if idempotent { self.retry_max_attempts } else { 1 };
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let authorization = self.credentials.authorization().await?;
            match request_builder()
                .header(header::AUTHORIZATION, authorization)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if attempt < max_attempts && is_retryable_github_status(status.as_u16()) {
                        warn!(
                            "github {} failed with {}, retrying (attempt {}/{})",
                            operation, status, attempt, max_attempts
                        );
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt)).await;
                        continue;
                    }
                    let body = response.text().await.unwrap_or_default();
                    debug!(
                        "github {} failed with {}: {}",
                        operation,
                        status,
                        truncate_for_error(&body, 800)
                    );
                    return Err(github_error(status, &body));
                }
                Err(error) => {
                    if attempt < max_attempts && (error.is_timeout() || error.is_connect()) {
                        warn!("github {} request failed, retrying: {}", operation, error);
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt)).await;
                        continue;
                    }
                    return Err(BotError::Transport(error));
                }
            }
        }
    }

    async fn request_json<T, F>(&self, operation: &str, idempotent: bool, request_builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self.send(operation, idempotent, request_builder).await?;
        decode_json(response).await
    }

    async fn graphql<T: DeserializeOwned>(&self, operation: &str, query: &str, variables: Value) -> Result<T> {
        #[derive(Deserialize)]
        struct GraphqlError {
            message: String,
        }

        #[derive(Deserialize)]
        struct GraphqlResponse<T> {
            data: Option<T>,
            #[serde(default)]
            errors: Vec<GraphqlError>,
        }

        let payload = json!({ "query": query, "variables": variables });
        let response: GraphqlResponse<T> = self
            .request_json(operation, false, || self.http.post(&self.graphql_url).json(&payload))
            .await?;
        if !response.errors.is_empty() {
            let message = response
                .errors
                .iter()
                .map(|error| error.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(BotError::Github {
                status: 400,
                message,
            });
        }
        response.data.ok_or_else(|| {
            BotError::InvalidResponse(format!("github graphql {operation} returned no data"))
        })
    }
}

fn is_retryable_github_status(status: u16) -> bool {
    status == 429 || status >= 500
}

fn retry_delay(base_delay_ms: u64, attempt: usize) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10) as u32;
    let scaled = base_delay_ms.saturating_mul(2_u64.saturating_pow(exponent));
    Duration::from_millis(scaled.min(30_000))
}

pub(crate) fn github_error(status: reqwest::StatusCode, body: &str) -> BotError {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|error| error.message)
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("Unknown").to_string());
    BotError::Github {
        status: status.as_u16(),
        message,
    }
}

pub(crate) async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let url = response.url().to_string();
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        BotError::InvalidResponse(format!(
            "invalid json response body at {url} reason: {e}"
        ))
    })
}

#[async_trait]
impl SourceControl for GithubClient {
    async fn pull_request(&self, repository: &Repository, number: u64) -> Result<PullRequest> {
        let url = self.repo_url(repository, &format!("pulls/{number}"));
        self.request_json("get pull request", true, || self.http.get(&url))
            .await
    }

    async fn directory_listing(
        &self,
        repository: &Repository,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<ContentEntry>>> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Contents {
            Many(Vec<ContentEntry>),
            One(ContentEntry),
        }

        let url = self.repo_url(repository, &format!("contents/{path}"));
        let result: Result<Contents> = self
            .request_json("get contents", true, || {
                self.http.get(&url).query(&[("ref", git_ref)])
            })
            .await;
        match result {
            Ok(Contents::Many(entries)) => Ok(Some(entries)),
            Ok(Contents::One(entry)) => Ok(Some(vec![entry])),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn create_issue_comment(
        &self,
        repository: &Repository,
        issue_number: u64,
        body: &str,
    ) -> Result<Comment> {
        debug!("adding comment to {}#{}", repository.full_name, issue_number);
        let url = self.repo_url(repository, &format!("issues/{issue_number}/comments"));
        let payload = json!({ "body": body });
        self.request_json("create issue comment", false, || {
            self.http.post(&url).json(&payload)
        })
        .await
    }

    async fn update_comment(
        &self,
        repository: &Repository,
        kind: CommentKind,
        comment_id: u64,
        body: &str,
    ) -> Result<Comment> {
        let path = match kind {
            CommentKind::Issue => format!("issues/comments/{comment_id}"),
            CommentKind::Review => format!("pulls/comments/{comment_id}"),
        };
        let url = self.repo_url(repository, &path);
        let payload = json!({ "body": body });
        self.request_json("update comment", false, || {
            self.http.patch(&url).json(&payload)
        })
        .await
    }

    async fn user(&self, login: &str) -> Result<UserProfile> {
        let url = format!("{}/users/{}", self.api_base, login);
        self.request_json("get user", true, || self.http.get(&url))
            .await
    }

    async fn recent_pr_comments(
        &self,
        repository: &Repository,
        pr_number: u64,
    ) -> Result<RecentComments> {
        #[derive(Deserialize)]
        struct Login {
            login: String,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Node {
            id: String,
            viewer_did_author: bool,
            #[serde(default)]
            editor: Option<Login>,
            is_minimized: bool,
        }

        #[derive(Deserialize)]
        struct Nodes {
            nodes: Vec<Node>,
        }

        #[derive(Deserialize)]
        struct CommentsHolder {
            comments: Nodes,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RepositoryHolder {
            pull_request: CommentsHolder,
        }

        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "self")]
            viewer: Login,
            comments: RepositoryHolder,
        }

        let data: Data = self
            .graphql(
                "list recent comments",
                COMMENTS_QUERY,
                json!({
                    "repoName": repository.name,
                    "repoOwner": repository.owner.login,
                    "prNumber": pr_number,
                    "last": RECENT_COMMENT_WINDOW,
                }),
            )
            .await?;

        Ok(RecentComments {
            viewer_login: data.viewer.login,
            comments: data
                .comments
                .pull_request
                .comments
                .nodes
                .into_iter()
                .map(|node| RecentComment {
                    id: node.id,
                    viewer_did_author: node.viewer_did_author,
                    editor_login: node.editor.map(|editor| editor.login),
                    is_minimized: node.is_minimized,
                })
                .collect(),
        })
    }

    async fn minimize_comment(&self, node_id: &str) -> Result<()> {
        let _: Value = self
            .graphql(
                "minimize comment",
                MINIMIZE_MUTATION,
                json!({ "subjectId": node_id }),
            )
            .await?;
        Ok(())
    }
}

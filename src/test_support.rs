//! In-memory fakes of the GitHub and Buildkite clients, plus payload fixtures.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::buildkite::{Build, BuildRequest, CiOrchestrator};
use crate::error::{BotError, Result};
use crate::events::{Bot, BotSettings};
use crate::github::{ContentEntry, RecentComments, SourceControl, UserProfile};
use crate::pipelines::Pipeline;
use crate::webhook::{Account, BranchRef, Comment, CommentKind, PullRequest, Repository};

pub(crate) const HEAD_SHA: &str = "6d8e2f1a0b9c8d7e6f5a4b3c2d1e0f9a8b7c6d5e";

pub(crate) fn repository() -> Repository {
    Repository {
        name: "some-repo".to_string(),
        full_name: "some-org/some-repo".to_string(),
        owner: Account {
            login: "some-org".to_string(),
        },
        ssh_url: "git@github.com:some-org/some-repo.git".to_string(),
        default_branch: Some("master".to_string()),
    }
}

pub(crate) fn pull_request(number: u64) -> PullRequest {
    PullRequest {
        number,
        title: "Some PR".to_string(),
        html_url: format!("https://github.com/some-org/some-repo/pull/{number}"),
        head: BranchRef {
            ref_name: "feature-branch".to_string(),
            sha: HEAD_SHA.to_string(),
            repo: Some(repository()),
        },
        base: BranchRef {
            ref_name: "master".to_string(),
            sha: "0000000000000000000000000000000000000000".to_string(),
            repo: Some(repository()),
        },
    }
}

pub(crate) fn comment(id: u64, body: &str) -> Comment {
    Comment {
        id,
        node_id: format!("IC_{id}"),
        body: body.to_string(),
        url: format!("https://api.github.com/repos/some-org/some-repo/issues/comments/{id}"),
        html_url: format!("https://github.com/some-org/some-repo/pull/9500#issuecomment-{id}"),
    }
}

pub(crate) fn pipeline(slug: &str, description: Option<&str>, readme_override: Option<&str>) -> Pipeline {
    let mut env = serde_json::Map::new();
    env.insert(
        "GH_CONTROL_IS_VALID_BRANCH_BUILD".to_string(),
        serde_json::Value::from("1"),
    );
    if let Some(url) = readme_override {
        env.insert("GH_CONTROL_README_URL".to_string(), serde_json::Value::from(url));
    }
    Pipeline {
        slug: slug.to_string(),
        repository: "git@github.com:some-org/some-repo.git".to_string(),
        description: description.map(str::to_string),
        env: Some(env.into_iter().collect()),
    }
}

pub(crate) fn bot(scm: Arc<FakeScm>, ci: Arc<FakeCi>, collapse_old_comments: bool) -> Bot {
    Bot::new(
        scm,
        ci,
        BotSettings {
            web_url: "https://github.com".to_string(),
            collapse_old_comments,
        },
    )
}

pub(crate) struct FakeCi {
    pipelines: Vec<Pipeline>,
    failing: HashSet<String>,
    created: Mutex<Vec<(String, BuildRequest)>>,
    list_calls: Mutex<usize>,
}

impl FakeCi {
    pub(crate) fn new(pipelines: Vec<Pipeline>) -> Self {
        Self {
            pipelines,
            failing: HashSet::new(),
            created: Mutex::new(Vec::new()),
            list_calls: Mutex::new(0),
        }
    }

    pub(crate) fn failing_on(mut self, slug: &str) -> Self {
        self.failing.insert(slug.to_string());
        self
    }

    pub(crate) fn created(&self) -> Vec<(String, BuildRequest)> {
        self.created.lock().unwrap().clone()
    }

    pub(crate) fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }
}

#[async_trait]
impl CiOrchestrator for FakeCi {
    fn organization(&self) -> &str {
        "some-org"
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        *self.list_calls.lock().unwrap() += 1;
        Ok(self.pipelines.clone())
    }

    async fn create_build(&self, pipeline_slug: &str, request: &BuildRequest) -> Result<Build> {
        if self.failing.contains(pipeline_slug) {
            return Err(BotError::Buildkite {
                status: 422,
                reason: "Unprocessable Entity".to_string(),
            });
        }
        let mut created = self.created.lock().unwrap();
        created.push((pipeline_slug.to_string(), request.clone()));
        let number = created.len() as u64;
        Ok(Build {
            web_url: format!("https://buildkite.com/some-org/{pipeline_slug}/builds/{number}"),
            number,
            scheduled_at: Some("2017-02-22T04:06:50.000Z".to_string()),
        })
    }
}

/// Every call the fake GitHub client received, in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ScmCall {
    PullRequest(u64),
    DirectoryListing { path: String, git_ref: String },
    CreateComment { issue_number: u64, body: String },
    UpdateComment { kind: CommentKind, comment_id: u64, body: String },
    User(String),
    RecentComments(u64),
    Minimize(String),
}

#[derive(Default)]
pub(crate) struct FakeScm {
    pull_requests: HashMap<u64, PullRequest>,
    listing: Option<Vec<ContentEntry>>,
    users: HashMap<String, UserProfile>,
    recent: Option<RecentComments>,
    failing_minimize: HashSet<String>,
    calls: Mutex<Vec<ScmCall>>,
}

impl FakeScm {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_pull_request(mut self, pr: PullRequest) -> Self {
        self.pull_requests.insert(pr.number, pr);
        self
    }

    pub(crate) fn with_listing(mut self, entries: Vec<ContentEntry>) -> Self {
        self.listing = Some(entries);
        self
    }

    pub(crate) fn with_user(mut self, login: &str, name: Option<&str>, email: Option<&str>) -> Self {
        self.users.insert(
            login.to_string(),
            UserProfile {
                login: login.to_string(),
                name: name.map(str::to_string),
                email: email.map(str::to_string),
            },
        );
        self
    }

    pub(crate) fn with_recent_comments(mut self, recent: RecentComments) -> Self {
        self.recent = Some(recent);
        self
    }

    pub(crate) fn failing_minimize(mut self, node_id: &str) -> Self {
        self.failing_minimize.insert(node_id.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<ScmCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ScmCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn not_found() -> BotError {
        BotError::Github {
            status: 404,
            message: "Not Found".to_string(),
        }
    }
}

#[async_trait]
impl SourceControl for FakeScm {
    async fn pull_request(&self, _repository: &Repository, number: u64) -> Result<PullRequest> {
        self.record(ScmCall::PullRequest(number));
        self.pull_requests
            .get(&number)
            .cloned()
            .ok_or_else(Self::not_found)
    }

    async fn directory_listing(
        &self,
        _repository: &Repository,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<ContentEntry>>> {
        self.record(ScmCall::DirectoryListing {
            path: path.to_string(),
            git_ref: git_ref.to_string(),
        });
        Ok(self.listing.clone())
    }

    async fn create_issue_comment(
        &self,
        _repository: &Repository,
        issue_number: u64,
        body: &str,
    ) -> Result<Comment> {
        self.record(ScmCall::CreateComment {
            issue_number,
            body: body.to_string(),
        });
        Ok(comment(555, body))
    }

    async fn update_comment(
        &self,
        _repository: &Repository,
        kind: CommentKind,
        comment_id: u64,
        body: &str,
    ) -> Result<Comment> {
        self.record(ScmCall::UpdateComment {
            kind,
            comment_id,
            body: body.to_string(),
        });
        Ok(comment(comment_id, body))
    }

    async fn user(&self, login: &str) -> Result<UserProfile> {
        self.record(ScmCall::User(login.to_string()));
        self.users.get(login).cloned().ok_or_else(Self::not_found)
    }

    async fn recent_pr_comments(
        &self,
        _repository: &Repository,
        pr_number: u64,
    ) -> Result<RecentComments> {
        self.record(ScmCall::RecentComments(pr_number));
        self.recent.clone().ok_or_else(|| BotError::Github {
            status: 502,
            message: "Bad Gateway".to_string(),
        })
    }

    async fn minimize_comment(&self, node_id: &str) -> Result<()> {
        self.record(ScmCall::Minimize(node_id.to_string()));
        if self.failing_minimize.contains(node_id) {
            return Err(BotError::Github {
                status: 400,
                message: format!("Could not resolve to a node with the global id of '{node_id}'"),
            });
        }
        Ok(())
    }
}

//! Turns a parsed trigger command into Buildkite builds.

use futures::future::try_join_all;
use std::collections::BTreeMap;
use tracing::info;

use crate::buildkite::{Build, BuildAuthor, BuildRequest, CiOrchestrator};
use crate::error::Result;
use crate::webhook::{PullRequest, Repository};

/// GitHub user who asked for the builds.
#[derive(Debug, Clone, PartialEq)]
pub struct Requester {
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartedBuild {
    pub name: String,
    pub build: Build,
}

/// Assembles the request shared by every build of one trigger comment.
///
/// `repository` is the repository the event came from and stands in for a
/// missing head or base repository. `user_env` must already be namespaced.
pub fn build_request(
    pr: &PullRequest,
    repository: &Repository,
    requester: &Requester,
    comment_url: &str,
    user_env: BTreeMap<String, String>,
) -> BuildRequest {
    let base_repo = pr.base.repo.as_ref().unwrap_or(repository);
    let head_repo = pr.head.repo.as_ref().unwrap_or(base_repo);
    let number = pr.number.to_string();

    let mut env = BTreeMap::new();
    let mut set = |key: &str, value: &str| {
        env.insert(key.to_string(), value.to_string());
    };

    set("BUILDKITE_PULL_REQUEST", &number);
    set("BUILDKITE_PULL_REQUEST_BASE_BRANCH", &pr.base.ref_name);
    set("BUILDKITE_PULL_REQUEST_REPO", &base_repo.ssh_url);
    set("GH_CONTROL_PR_NUMBER", &number);
    set("GH_CONTROL_PR_TITLE", &pr.title);
    set("GH_CONTROL_PR_BASE_BRANCH", &pr.base.ref_name);
    set("GH_CONTROL_PR_BASE_REPO", &base_repo.full_name);
    set("GH_CONTROL_PR_HEAD_REPO", &head_repo.full_name);

    set("GH_CONTROL_BUILD", "true");
    set("GH_CONTROL_GITHUB_USER", &requester.login);
    if let Some(email) = &requester.email {
        set("GH_CONTROL_GITHUB_USER_EMAIL", email);
    }
    if let Some(name) = &requester.name {
        set("GH_CONTROL_GITHUB_USER_NAME", name);
    }
    set("GH_CONTROL_GITHUB_TRIGGER_COMMENT_URL", comment_url);

    env.extend(user_env);

    BuildRequest {
        commit: pr.head.sha.clone(),
        branch: pr.head.ref_name.clone(),
        message: format!(
            "On-demand build for branch \"{}\" requested by @{} from PR #{}",
            pr.head.ref_name, requester.login, pr.number
        ),
        ignore_pipeline_branch_filters: true,
        author: BuildAuthor {
            name: requester.name.clone(),
            email: requester.email.clone(),
        },
        env,
    }
}

/// Submits one build per name concurrently.
///
/// Results keep the order of `build_names`; the first failure fails the batch.
pub async fn start_builds(
    ci: &dyn CiOrchestrator,
    build_names: &[String],
    request: &BuildRequest,
) -> Result<Vec<StartedBuild>> {
    info!(
        "Starting {} build(s) for {}@{}",
        build_names.len(),
        request.branch,
        request.commit
    );
    let builds = try_join_all(
        build_names
            .iter()
            .map(|name| ci.create_build(name, request)),
    )
    .await?;

    Ok(build_names
        .iter()
        .cloned()
        .zip(builds)
        .map(|(name, build)| StartedBuild { name, build })
        .collect())
}

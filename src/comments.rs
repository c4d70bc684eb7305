//! Everything the bot writes into pull request threads.
//!
//! Announcements and warnings are new issue comments; fulfilment rewrites the
//! trigger comment in place, and collapsing minimizes older bot comments.

use futures::future::join_all;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::dispatch::StartedBuild;
use crate::error::Result;
use crate::github::{RecentComments, SourceControl};
use crate::pipelines::Pipeline;
use crate::trigger::TriggerCommand;
use crate::utils::template;
use crate::webhook::{Comment, CommentKind, PullRequest, Repository};

/// Repository directory holding `<ci-org>/<pipeline>.md` descriptions.
pub const DOCROOT: &str = ".buildkite/pipeline/description";

pub const CUSTOM_ENV_DOCS_URL: &str = "https://github.com/canva-public/rocketbot/blob/main/docs/getting-started.md#passing-custom-environment-variables";

const BOT_SUFFIX: &str = "[bot]";

/// Where to learn about, or document, a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum DocLink {
    Found(String),
    Missing { create_url: String },
}

impl DocLink {
    pub fn markdown(&self) -> String {
        match self {
            DocLink::Found(url) => format!("[:information_source:]({url} \"See more information\")"),
            DocLink::Missing { create_url } => {
                format!("[:heavy_plus_sign:]({create_url} \"Add more information\")")
            }
        }
    }
}

/// Result of the best-effort cleanup after a fulfilment.
#[derive(Debug, Clone, PartialEq)]
pub enum CleanupOutcome {
    Disabled,
    Collapsed { node_ids: Vec<String> },
    Failed(String),
}

/// Pre-filled "new file" page for a pipeline's description.
fn creation_link(
    web_url: &str,
    repository: &Repository,
    pr: &PullRequest,
    ci_org: &str,
    slug: &str,
) -> String {
    let head_repo = pr.head.repo.as_ref().unwrap_or(repository);
    let branch = head_repo
        .default_branch
        .as_deref()
        .unwrap_or(pr.base.ref_name.as_str());
    let value = format!("# {slug}\n\n[Document {slug}'s RocketBot options here]");
    format!(
        "{}/{}/new/{}/{}/{}?filename={}.md&value={}",
        web_url.trim_end_matches('/'),
        head_repo.full_name,
        branch,
        DOCROOT,
        ci_org,
        slug,
        urlencoding::encode(&value)
    )
}

/// Resolves one documentation link per pipeline slug.
///
/// The description directory is listed at most once, at the PR head commit,
/// and only if some pipeline has no templated override.
pub async fn documentation_links(
    scm: &dyn SourceControl,
    repository: &Repository,
    pr: &PullRequest,
    ci_org: &str,
    web_url: &str,
    pipelines: &[Pipeline],
) -> Result<BTreeMap<String, DocLink>> {
    let directory = format!("{DOCROOT}/{ci_org}");
    let listing = if pipelines.iter().any(|p| p.readme_override().is_none()) {
        let listing = scm
            .directory_listing(repository, &directory, &pr.head.sha)
            .await?;
        if listing.is_none() {
            debug!(
                "no pipeline documentation files found for repository {} and Buildkite org {}",
                repository.full_name, ci_org
            );
        }
        listing.unwrap_or_default()
    } else {
        Vec::new()
    };

    let mapping = HashMap::from([
        ("COMMITISH", pr.head.sha.clone()),
        ("ORG", repository.owner.login.clone()),
        ("REPO", repository.name.clone()),
    ]);

    let links = pipelines
        .iter()
        .map(|pipeline| {
            let link = match pipeline.readme_override() {
                Some(url) => DocLink::Found(template(url, &mapping)),
                None => {
                    let expected = format!("{directory}/{}.md", pipeline.slug);
                    listing
                        .iter()
                        .find(|entry| entry.path == expected)
                        .and_then(|entry| entry.html_url.clone())
                        .map(DocLink::Found)
                        .unwrap_or_else(|| DocLink::Missing {
                            create_url: creation_link(
                                web_url,
                                repository,
                                pr,
                                ci_org,
                                &pipeline.slug,
                            ),
                        })
                }
            };
            (pipeline.slug.clone(), link)
        })
        .collect();
    Ok(links)
}

pub fn render_announcement(pipelines: &[Pipeline], links: &BTreeMap<String, DocLink>) -> String {
    let mut sorted: Vec<&Pipeline> = pipelines.iter().collect();
    sorted.sort_by(|a, b| a.slug.cmp(&b.slug));

    let rows = sorted
        .iter()
        .map(|pipeline| {
            let link = links
                .get(&pipeline.slug)
                .map(DocLink::markdown)
                .unwrap_or_default();
            format!(
                "| `:rocket:[{}]` | {} | {} |",
                pipeline.slug,
                pipeline.description_text().replace('|', "\\|"),
                link
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        ":tada: Almost merged!
<details>
<summary>Request a branch build</summary>

By commenting on this PR with: `:rocket:[<pipeline>]`, e.g.

| Comment | Description | More info |
| --- | --- | --- |
{rows}

_Note: you can pass [custom environment variables]({CUSTOM_ENV_DOCS_URL}) to some builds._

> Pro-Tip: It is also possible to run multiple builds at once, like this: `:rocket:[<pipeline-1>][...][<pipeline-n>]`
</details>"
    )
}

/// Posts the usage table for `pipelines` on a freshly opened PR.
pub async fn announce(
    scm: &dyn SourceControl,
    repository: &Repository,
    pr: &PullRequest,
    ci_org: &str,
    web_url: &str,
    pipelines: &[Pipeline],
) -> Result<Comment> {
    let links = documentation_links(scm, repository, pr, ci_org, web_url, pipelines).await?;
    let body = render_announcement(pipelines, &links);
    let comment = scm.create_issue_comment(repository, pr.number, &body).await?;
    info!(
        "Left a comment {} on how to start branch builds on {}",
        comment.html_url, pr.html_url
    );
    Ok(comment)
}

/// Value as it must be written to parse back to itself.
fn repeatable_value(value: &str) -> Cow<'_, str> {
    if value != value.trim() || value.starts_with('"') || value.contains('\n') {
        serde_json::to_string(value)
            .map(Cow::Owned)
            .unwrap_or(Cow::Borrowed(value))
    } else {
        Cow::Borrowed(value)
    }
}

fn ini_block<'a>(pairs: impl Iterator<Item = (&'a String, Cow<'a, str>)>) -> String {
    let lines = pairs
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("```ini\n{lines}\n```")
}

pub fn render_fulfilment(head_sha: &str, command: &TriggerCommand, builds: &[StartedBuild]) -> String {
    let build_lines = builds
        .iter()
        .map(|started| {
            format!(
                "* [{}#{}]({}) scheduled at `{}`",
                started.name,
                started.build.number,
                started.build.web_url,
                started.build.scheduled_at_display()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let (env_paragraph, repeat_env) = if command.has_env() {
        let namespaced = command.namespaced_env();
        (
            format!(
                "\n\nwith user-defined environment variables:\n{}",
                ini_block(namespaced.iter().map(|(k, v)| (k, Cow::Borrowed(v.as_str()))))
            ),
            format!(
                "\n\n{}",
                ini_block(command.env.iter().map(|(k, v)| (k, repeatable_value(v))))
            ),
        )
    } else {
        (String::new(), String::new())
    };

    let repeat_lines = command
        .build_names
        .iter()
        .map(|name| format!(":rocket:[{name}]"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "pls gib green ༼ つ ◕_◕ ༽つ via {head_sha}:
{build_lines}{env_paragraph}
<details>
<summary>Repeat this build</summary>

````md
{repeat_lines}{repeat_env}
````
</details>
"
    )
}

/// Rewrites the trigger comment with the started builds. Never creates a comment.
pub async fn fulfil(
    scm: &dyn SourceControl,
    repository: &Repository,
    kind: CommentKind,
    comment_id: u64,
    body: &str,
) -> Result<Comment> {
    let comment = scm
        .update_comment(repository, kind, comment_id, body)
        .await?;
    info!("Updated comment {} with build URL", comment.html_url);
    Ok(comment)
}

pub fn strip_bot_suffix(login: &str) -> &str {
    login.strip_suffix(BOT_SUFFIX).unwrap_or(login)
}

/// Node ids of earlier bot comments that are still expanded.
pub fn superseded_comment_ids(recent: &RecentComments, current_node_id: &str) -> Vec<String> {
    let viewer = strip_bot_suffix(&recent.viewer_login);
    recent
        .comments
        .iter()
        .filter(|comment| !comment.is_minimized && comment.id != current_node_id)
        .filter(|comment| {
            comment.viewer_did_author || comment.editor_login.as_deref() == Some(viewer)
        })
        .map(|comment| comment.id.clone())
        .collect()
}

/// Minimizes superseded bot comments on the PR. Failures are reported, never raised.
pub async fn collapse_superseded(
    scm: &dyn SourceControl,
    repository: &Repository,
    pr_number: u64,
    current_node_id: &str,
) -> CleanupOutcome {
    let recent = match scm.recent_pr_comments(repository, pr_number).await {
        Ok(recent) => recent,
        Err(e) => {
            warn!("Could not read recent comments of #{}: {}", pr_number, e);
            return CleanupOutcome::Failed(e.to_string());
        }
    };
    info!("current user is \"{}\"", strip_bot_suffix(&recent.viewer_login));

    let node_ids = superseded_comment_ids(&recent, current_node_id);
    info!("Collapsing comment IDs: {:?}", node_ids);

    let results = join_all(node_ids.iter().map(|id| scm.minimize_comment(id))).await;
    let failures: Vec<String> = node_ids
        .iter()
        .zip(results)
        .filter_map(|(id, result)| result.err().map(|e| format!("{id}: {e}")))
        .collect();
    if failures.is_empty() {
        CleanupOutcome::Collapsed { node_ids }
    } else {
        for failure in &failures {
            warn!("Could not collapse comment {}", failure);
        }
        CleanupOutcome::Failed(failures.join("; "))
    }
}

pub const UNRECOGNIZED_COMMAND_MESSAGE: &str = "Your last comment looked similar to a command but Rocketbot couldn't understand it. Were you trying to [run a build](https://github.com/canva-public/rocketbot/blob/main/docs/getting-started.md#run-a-build)?";

/// Tells the author a rocket-looking comment was not understood.
pub async fn warn_unrecognized(
    scm: &dyn SourceControl,
    repository: &Repository,
    issue_number: u64,
) -> Result<Comment> {
    let comment = scm
        .create_issue_comment(repository, issue_number, UNRECOGNIZED_COMMAND_MESSAGE)
        .await?;
    info!("Contains preamble but did not qualify as a trigger. Warned the user");
    Ok(comment)
}

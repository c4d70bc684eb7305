use std::future::Future;
use std::pin::Pin;
use tracing::info;

use super::{Bot, BotResponse};
use crate::comments::{self, CleanupOutcome};
use crate::dispatch::{self, Requester};
use crate::error::Result;
use crate::trigger::{has_preamble, is_trigger_comment, parse_trigger_comment};
use crate::webhook::{
    Account, Comment, CommentKind, IssueCommentEvent, PullRequest, Repository, ReviewCommentEvent,
};

/// Common view over issue comments and review comments.
#[derive(Debug, Clone, Copy)]
pub struct CommentEvent<'a> {
    pub kind: CommentKind,
    pub action: &'a str,
    pub repository: &'a Repository,
    pub comment: &'a Comment,
    pub sender: &'a Account,
    /// Issue or PR number the comment lives on.
    pub number: u64,
    /// False for comments on plain issues.
    pub on_pull_request: bool,
    /// Present for review comments, whose payload embeds the PR.
    pub pull_request: Option<&'a PullRequest>,
}

impl<'a> CommentEvent<'a> {
    pub fn from_issue_comment(event: &'a IssueCommentEvent) -> Self {
        Self {
            kind: CommentKind::Issue,
            action: &event.action,
            repository: &event.repository,
            comment: &event.comment,
            sender: &event.sender,
            number: event.issue.number,
            on_pull_request: event.issue.pull_request.is_some(),
            pull_request: None,
        }
    }

    pub fn from_review_comment(event: &'a ReviewCommentEvent) -> Self {
        Self {
            kind: CommentKind::Review,
            action: &event.action,
            repository: &event.repository,
            comment: &event.comment,
            sender: &event.sender,
            number: event.pull_request.number,
            on_pull_request: true,
            pull_request: Some(&event.pull_request),
        }
    }
}

fn ignored() -> (BotResponse, CleanupOutcome) {
    (BotResponse::ignored(), CleanupOutcome::Disabled)
}

type PullRequestFuture<'a> = Pin<Box<dyn Future<Output = Result<PullRequest>> + Send + 'a>>;

pub(super) async fn handle(
    bot: &Bot,
    event: &CommentEvent<'_>,
) -> Result<(BotResponse, CleanupOutcome)> {
    if event.action == "deleted" {
        info!("Comment was deleted, nothing to do here");
        return Ok(ignored());
    }
    if !event.on_pull_request {
        info!("Request is not coming from a pull request, nothing to do here");
        return Ok(ignored());
    }

    let body = event.comment.body.as_str();
    if !is_trigger_comment(body) {
        if !has_preamble(body) {
            info!("Not a comment to trigger a build run, nothing to do here");
            return Ok(ignored());
        }
        let warning =
            comments::warn_unrecognized(bot.scm.as_ref(), event.repository, event.number).await?;
        return Ok((
            BotResponse::commented(warning.html_url),
            CleanupOutcome::Disabled,
        ));
    }

    let command = parse_trigger_comment(body);
    info!(
        "@{} requested \"{}\" for {}#{}",
        event.sender.login,
        command.build_names.join(","),
        event.repository.full_name,
        event.number
    );

    let pull_request: PullRequestFuture<'_> = match event.pull_request {
        Some(pr) => Box::pin(std::future::ready(Ok(pr.clone()))),
        None => bot.scm.pull_request(event.repository, event.number),
    };
    let (pr, profile) = tokio::try_join!(pull_request, bot.scm.user(&event.sender.login))?;

    let requester = Requester {
        login: event.sender.login.clone(),
        name: profile.name,
        email: profile.email,
    };
    let request = dispatch::build_request(
        &pr,
        event.repository,
        &requester,
        &event.comment.url,
        command.namespaced_env(),
    );
    let builds = dispatch::start_builds(bot.ci.as_ref(), &command.build_names, &request).await?;

    let updated_body = comments::render_fulfilment(&pr.head.sha, &command, &builds);
    let updated = comments::fulfil(
        bot.scm.as_ref(),
        event.repository,
        event.kind,
        event.comment.id,
        &updated_body,
    )
    .await?;

    let cleanup = if bot.settings.collapse_old_comments {
        comments::collapse_superseded(bot.scm.as_ref(), event.repository, pr.number, &updated.node_id)
            .await
    } else {
        CleanupOutcome::Disabled
    };

    Ok((BotResponse::triggered(updated.html_url), cleanup))
}

use tracing::info;

use super::{Bot, BotResponse};
use crate::comments;
use crate::error::Result;
use crate::pipelines::matching_pipelines;
use crate::webhook::PullRequestEvent;

pub(super) async fn handle(bot: &Bot, event: &PullRequestEvent) -> Result<BotResponse> {
    if event.action != "opened" {
        info!("PR was not opened, nothing to do here");
        return Ok(BotResponse::ignored());
    }

    info!("PR was opened");
    let pipelines = matching_pipelines(bot.ci.list_pipelines().await?, &event.repository.ssh_url);
    if pipelines.is_empty() {
        info!("No matching/enabled pipelines for this repository, nothing to do here");
        return Ok(BotResponse::not_commented());
    }

    let comment = comments::announce(
        bot.scm.as_ref(),
        &event.repository,
        &event.pull_request,
        bot.ci.organization(),
        &bot.settings.web_url,
        &pipelines,
    )
    .await?;
    Ok(BotResponse::commented(comment.html_url))
}

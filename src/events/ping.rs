use tracing::info;

use super::BotResponse;
use crate::error::{BotError, Result};
use crate::webhook::PingEvent;

pub(super) fn handle(event: &PingEvent) -> Result<BotResponse> {
    let delivers_issue_comments = event
        .hook
        .events
        .iter()
        .any(|name| name == "issue_comment");
    if !event.hook.active || !delivers_issue_comments {
        return Err(BotError::HookMisconfigured(
            "Configure at least the delivery of issue comments".to_string(),
        ));
    }

    let repository = event
        .repository
        .as_ref()
        .map(|repository| repository.full_name.as_str())
        .unwrap_or("unknown repository");
    info!("Ping received for {}", repository);
    Ok(BotResponse::acknowledged(format!(
        "Hooks working for {repository}"
    )))
}

//! Webhook handler for GitHub events

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, Method},
};
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use crate::SharedState;
use crate::error::{BotError, Result};
use crate::events::BotResponse;
use crate::utils::{SIGNATURE_256_HEADER, SIGNATURE_HEADER, verify_webhook_signature};
use crate::webhook::{DELIVERY_HEADER, EVENT_HEADER, WebhookEvent};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Handles a GitHub webhook delivery.
///
/// Method, signature and event kind are checked before the body is decoded,
/// and all of them before any remote API is called.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BotResponse>> {
    let delivery = header(&headers, DELIVERY_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::now_v7().to_string());
    let event_kind = header(&headers, EVENT_HEADER).unwrap_or_default().to_string();
    let span = info_span!("webhook", delivery = %delivery, event = %event_kind);

    async move {
        let result = process(&state, &method, &headers, &body).await;
        match &result {
            Ok(response) => info!(
                triggered = response.triggered,
                commented = ?response.commented,
                "Webhook handled"
            ),
            Err(e) => error!(status = %e.status_code(), "Webhook failed: {}", e),
        }
        result.map(Json)
    }
    .instrument(span)
    .await
}

async fn process(
    state: &SharedState,
    method: &Method,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<BotResponse> {
    if method != Method::POST {
        return Err(BotError::UnsupportedMethod(method.to_string()));
    }

    if let Some(secret) = state.webhook_secret.as_deref() {
        verify_webhook_signature(
            secret,
            body,
            header(headers, SIGNATURE_256_HEADER),
            header(headers, SIGNATURE_HEADER),
        )?;
        debug!("Signature verified");
    }

    let kind = header(headers, EVENT_HEADER).ok_or(BotError::MissingEventHeader)?;
    let event = WebhookEvent::parse(kind, body)?;
    debug!("Decoded {} event", event.kind());
    state.bot.handle(event).await
}

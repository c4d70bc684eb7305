use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::io;

/// Custom error type for rocketbot operations
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Unsupported method \"{0}\"")]
    UnsupportedMethod(String),

    #[error("Unsupported event type \"{0}\"")]
    UnsupportedEvent(String),

    #[error("No X-GitHub-Event header found on request")]
    MissingEventHeader,

    #[error("Could not parse event body: {0}")]
    InvalidEventBody(String),

    #[error("No X-Hub-Signature-256 or X-Hub-Signature found on request")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    /// The webhook itself is set up in a way the bot cannot work with.
    #[error("{0}")]
    HookMisconfigured(String),

    /// GitHub answered with a non-2xx status.
    #[error("{message}")]
    Github { status: u16, message: String },

    /// Buildkite answered with a non-2xx status.
    #[error("Response code {status} ({reason})")]
    Buildkite { status: u16, reason: String },

    /// A remote response had the wrong content type or undecodable JSON.
    #[error("{0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl BotError {
    /// Status code reported back to the webhook sender.
    ///
    /// GitHub error statuses pass through. Configuration problems are 500s and
    /// everything else is a 400.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BotError::Github { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|code| code.is_client_error() || code.is_server_error())
                .unwrap_or(StatusCode::BAD_REQUEST),
            BotError::ConfigError(_) | BotError::IoError(_) | BotError::TomlParseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BotError::Github { status: 404, .. } | BotError::Buildkite { status: 404, .. }
        )
    }
}

impl IntoResponse for BotError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Helper type for Results that use BotError
pub type Result<T> = std::result::Result<T, BotError>;

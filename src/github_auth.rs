//! Credentials for GitHub requests: a fixed token or GitHub App installation tokens.

use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::GithubAppConfig;
use crate::error::{BotError, Result};
use crate::github::{decode_json, github_error};

/// Installation tokens are replaced this long before GitHub expires them.
const REFRESH_MARGIN_SECS: i64 = 300;
/// GitHub rejects app JWTs that live longer than ten minutes.
const JWT_LIFETIME_SECS: i64 = 540;
const JWT_CLOCK_DRIFT_SECS: i64 = 60;

#[derive(Clone)]
pub enum Credentials {
    Token(HeaderValue),
    App(Arc<InstallationAuth>),
}

impl Credentials {
    pub fn token(token: &str) -> Result<Self> {
        let value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|e| BotError::ConfigError(format!("invalid github token: {e}")))?;
        Ok(Credentials::Token(value))
    }

    /// `Authorization` header for the next request.
    pub async fn authorization(&self) -> Result<HeaderValue> {
        match self {
            Credentials::Token(value) => Ok(value.clone()),
            Credentials::App(app) => {
                let token = app.installation_token().await?;
                HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                    BotError::InvalidResponse(format!("github returned an unusable installation token: {e}"))
                })
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppClaims {
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

struct InstallationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Exchanges app JWTs for installation tokens and caches them until shortly before expiry.
pub struct InstallationAuth {
    http: reqwest::Client,
    access_tokens_url: String,
    app_id: String,
    encoding_key: EncodingKey,
    cached: Mutex<Option<InstallationToken>>,
}

impl InstallationAuth {
    pub fn new(http: reqwest::Client, api_base: &str, config: &GithubAppConfig) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(config.private_key.as_bytes())
            .map_err(|e| BotError::ConfigError(format!("invalid github app private key: {e}")))?;
        Ok(Self {
            http,
            access_tokens_url: format!(
                "{}/app/installations/{}/access_tokens",
                api_base.trim_end_matches('/'),
                config.installation_id.trim()
            ),
            app_id: config.app_id.trim().to_string(),
            encoding_key,
            cached: Mutex::new(None),
        })
    }

    /// RS256 JWT identifying the app itself.
    pub fn app_jwt(&self, now: DateTime<Utc>) -> Result<String> {
        let claims = AppClaims {
            iat: now.timestamp() - JWT_CLOCK_DRIFT_SECS,
            exp: now.timestamp() + JWT_LIFETIME_SECS,
            iss: self.app_id.clone(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| BotError::ConfigError(format!("failed to sign github app token: {e}")))
    }

    pub async fn installation_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(current) = cached.as_ref() {
            if current.expires_at - TimeDelta::seconds(REFRESH_MARGIN_SECS) > now {
                return Ok(current.token.clone());
            }
        }
        let fresh = self.exchange(now).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn exchange(&self, now: DateTime<Utc>) -> Result<InstallationToken> {
        #[derive(Deserialize)]
        struct AccessToken {
            token: String,
            expires_at: DateTime<Utc>,
        }

        debug!("requesting installation token from {}", self.access_tokens_url);
        let jwt = self.app_jwt(now)?;
        let response = self
            .http
            .post(&self.access_tokens_url)
            .bearer_auth(jwt)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(github_error(status, &body));
        }
        let access: AccessToken = decode_json(response).await?;
        info!("Obtained github app installation token valid until {}", access.expires_at);
        Ok(InstallationToken {
            token: access.token,
            expires_at: access.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{AppClaims, Credentials, InstallationAuth};
    use crate::GithubAppConfig;
    use crate::error::BotError;
    use chrono::Utc;
    use httpmock::prelude::*;
    use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
    use serde_json::json;

    const PRIVATE_KEY: &str = include_str!("../tests/fixtures/github-app-private-key.pem");
    const PUBLIC_KEY: &str = include_str!("../tests/fixtures/github-app-public-key.pem");

    fn app_config() -> GithubAppConfig {
        GithubAppConfig {
            app_id: "12345".to_string(),
            private_key: PRIVATE_KEY.to_string(),
            installation_id: "67890".to_string(),
        }
    }

    fn auth(server: &MockServer) -> InstallationAuth {
        InstallationAuth::new(reqwest::Client::new(), &server.base_url(), &app_config())
            .expect("installation auth")
    }

    #[test]
    fn unit_app_jwt_is_rs256_signed_with_app_id_issuer() {
        let auth = InstallationAuth::new(reqwest::Client::new(), "https://api.github.com", &app_config())
            .expect("installation auth");
        let now = Utc::now();
        let jwt = auth.app_jwt(now).expect("jwt");

        let key = DecodingKey::from_rsa_pem(PUBLIC_KEY.as_bytes()).expect("public key");
        let decoded = decode::<AppClaims>(&jwt, &key, &Validation::new(Algorithm::RS256))
            .expect("signature verifies");
        assert_eq!(decoded.header.alg, Algorithm::RS256);
        assert_eq!(decoded.claims.iss, "12345");
        assert_eq!(decoded.claims.iat, now.timestamp() - 60);
        assert_eq!(decoded.claims.exp, now.timestamp() + 540);
    }

    #[test]
    fn unit_invalid_private_key_is_a_config_error() {
        let config = GithubAppConfig {
            private_key: "not a key".to_string(),
            ..app_config()
        };
        let error = InstallationAuth::new(reqwest::Client::new(), "https://api.github.com", &config)
            .err()
            .expect("rejected");
        assert!(matches!(error, BotError::ConfigError(_)));
    }

    #[tokio::test]
    async fn integration_installation_token_is_cached_until_close_to_expiry() {
        let server = MockServer::start();
        let exchange = server.mock(|when, then| {
            when.method(POST)
                .path("/app/installations/67890/access_tokens")
                .header_exists("authorization");
            then.status(201).json_body(json!({
                "token": "ghs_installation",
                "expires_at": "2099-01-01T00:00:00Z"
            }));
        });

        let credentials = Credentials::App(std::sync::Arc::new(auth(&server)));
        for _ in 0..2 {
            let header = credentials.authorization().await.expect("authorization");
            assert_eq!(header.to_str().expect("ascii"), "Bearer ghs_installation");
        }
        exchange.assert_calls(1);
    }

    #[tokio::test]
    async fn integration_expiring_installation_token_is_refreshed() {
        let server = MockServer::start();
        let exchange = server.mock(|when, then| {
            when.method(POST).path("/app/installations/67890/access_tokens");
            then.status(201).json_body(json!({
                "token": "ghs_short_lived",
                "expires_at": "2000-01-01T00:00:00Z"
            }));
        });

        let auth = auth(&server);
        auth.installation_token().await.expect("first token");
        auth.installation_token().await.expect("second token");
        exchange.assert_calls(2);
    }

    #[tokio::test]
    async fn integration_rejected_app_credentials_keep_github_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/app/installations/67890/access_tokens");
            then.status(401).json_body(json!({
                "message": "A JSON web token could not be decoded"
            }));
        });

        let error = auth(&server).installation_token().await.unwrap_err();
        assert!(matches!(error, BotError::Github { status: 401, .. }));
        assert_eq!(error.to_string(), "A JSON web token could not be decoded");
    }
}

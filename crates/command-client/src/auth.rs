//! CA API credentials
//!
//! Either HTTP basic auth or an OAuth2 client-credentials grant. OAuth
//! tokens are cached per client until shortly before they expire.

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::CommandError;

/// Tokens are refreshed this long before their reported expiry.
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(30);

/// Credentials used to authenticate against the CA API.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// HTTP basic auth
    Basic {
        /// User name, often `DOMAIN\\user`
        username: String,
        /// Password
        password: String,
    },
    /// OAuth2 client credentials grant
    OAuth {
        /// OAuth client id
        client_id: String,
        /// OAuth client secret
        client_secret: String,
        /// Token endpoint
        token_url: String,
        /// Requested scopes
        scopes: Vec<String>,
        /// Requested audience
        audience: Option<String>,
    },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::OAuth {
                client_id,
                token_url,
                scopes,
                audience,
                ..
            } => f
                .debug_struct("OAuth")
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .field("token_url", token_url)
                .field("scopes", scopes)
                .field("audience", audience)
                .finish(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now + TOKEN_EXPIRY_SLACK < at)
    }
}

/// Applies credentials to outgoing requests.
#[derive(Debug)]
pub(crate) struct Authenticator {
    credentials: Credentials,
    token: Mutex<Option<CachedToken>>,
}

impl Authenticator {
    pub(crate) fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            token: Mutex::new(None),
        }
    }

    /// Adds the authorization header for these credentials.
    pub(crate) async fn authorize(
        &self,
        client: &Client,
        request: RequestBuilder,
    ) -> Result<RequestBuilder, CommandError> {
        match &self.credentials {
            Credentials::Basic { username, password } => {
                Ok(request.basic_auth(username, Some(password)))
            }
            Credentials::OAuth { .. } => {
                let token = self.access_token(client).await?;
                Ok(request.bearer_auth(token))
            }
        }
    }

    /// Drops a cached token, e.g. after the API answered 401.
    pub(crate) async fn invalidate(&self) {
        *self.token.lock().await = None;
    }

    async fn access_token(&self, client: &Client) -> Result<String, CommandError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(token.value.clone());
        }

        let Credentials::OAuth {
            client_id,
            client_secret,
            token_url,
            scopes,
            audience,
        } = &self.credentials
        else {
            return Err(CommandError::Authentication(
                "access token requested for basic-auth credentials".to_string(),
            ));
        };

        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", client_id.clone()),
            ("client_secret", client_secret.clone()),
        ];
        if !scopes.is_empty() {
            form.push(("scope", scopes.join(" ")));
        }
        if let Some(audience) = audience {
            form.push(("audience", audience.clone()));
        }

        debug!(token_url = %token_url, "Requesting OAuth access token");
        let response = client
            .post(token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| CommandError::Authentication(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CommandError::Authentication(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CommandError::Authentication(format!("invalid token response: {e}")))?;

        let fresh = CachedToken {
            value: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        };
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }
}

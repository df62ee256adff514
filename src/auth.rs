//! OAuth2 authorization-code flow and access token management.
//!
//! Authorization is a small state machine driven by the caller:
//! [`Authenticator::begin_authorization`] returns the URL the user must open,
//! and [`Authenticator::submit_code`] redeems the code the user pastes back.
//! After that, [`Authenticator::get_access_token`] keeps the token fresh.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::{self, EnvFile, Endpoints};
use crate::error::{PanError, Result};
use crate::models::{AppCredentials, Credential, TokenResponse, Tokens};

/// Tokens closer than this to expiry are refreshed before use.
pub const REFRESH_THRESHOLD_SECS: u64 = 60;

/// Scopes requested during authorization.
const SCOPE: &str = "basic,netdisk";

/// Where the authorization flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NeedsAuthorization,
    AwaitingUserCode,
    Authorized,
}

#[derive(Default)]
struct AuthInner {
    tokens: Option<Tokens>,
    /// OAuth `state` of an authorization waiting for its code.
    pending_state: Option<String>,
}

/// Credential manager: redeems authorization codes and refreshes tokens.
#[derive(Clone)]
pub struct Authenticator {
    app: Arc<AppCredentials>,
    endpoints: Arc<Endpoints>,
    client: Client,
    inner: Arc<RwLock<AuthInner>>,
    store: Option<Arc<Mutex<EnvFile>>>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Authenticator {
    /// Create an authenticator that keeps tokens in memory only.
    pub fn new(credential: Credential, endpoints: Endpoints) -> Self {
        Self {
            app: Arc::new(credential.app),
            endpoints: Arc::new(endpoints),
            client: crate::client::build_http_client(),
            inner: Arc::new(RwLock::new(AuthInner {
                tokens: credential.tokens,
                pending_state: None,
            })),
            store: None,
        }
    }

    /// Persist every new token pair to `store`.
    pub fn with_store(mut self, store: EnvFile) -> Self {
        self.store = Some(Arc::new(Mutex::new(store)));
        self
    }

    /// Build from a loaded configuration, persisting tokens to its store.
    pub fn from_config(loaded: config::LoadedConfig) -> Self {
        Self::new(loaded.credential, loaded.endpoints).with_store(loaded.store)
    }

    pub fn app(&self) -> &AppCredentials {
        &self.app
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    pub async fn state(&self) -> AuthState {
        let inner = self.inner.read().await;
        if inner.pending_state.is_some() {
            AuthState::AwaitingUserCode
        } else if inner.tokens.is_some() {
            AuthState::Authorized
        } else {
            AuthState::NeedsAuthorization
        }
    }

    /// Snapshot of the current tokens.
    pub async fn tokens(&self) -> Option<Tokens> {
        self.inner.read().await.tokens.clone()
    }

    /// Start an authorization and return the URL the user must visit.
    pub async fn begin_authorization(&self) -> Result<String> {
        let state = match self.app.as_ref() {
            AppCredentials::Own { .. } => Uuid::new_v4().simple().to_string(),
            AppCredentials::Shared { .. } => self.fetch_relay_state().await?,
        };

        let authorize = format!("{}/oauth/2.0/authorize", self.endpoints.oauth);
        let url = Url::parse_with_params(
            &authorize,
            &[
                ("client_id", self.app.client_id()),
                ("redirect_uri", self.app.redirect_uri()),
                ("response_type", "code"),
                ("scope", SCOPE),
                ("state", state.as_str()),
            ],
        )
        .map_err(|e| PanError::Config(format!("invalid OAuth endpoint {}: {}", authorize, e)))?;

        self.inner.write().await.pending_state = Some(state);
        debug!(url = %url, "authorization started");
        Ok(url.into())
    }

    /// Redeem the code returned by the authorization page.
    ///
    /// On failure the authorization stays pending so the code can be re-entered.
    pub async fn submit_code(&self, code: &str) -> Result<()> {
        let state = self
            .inner
            .read()
            .await
            .pending_state
            .clone()
            .ok_or_else(|| {
                PanError::Authorization("no authorization in progress".to_string())
            })?;

        let code = code.trim();
        if code.is_empty() {
            return Err(PanError::Authorization("authorization code is empty".to_string()));
        }

        let request = match self.app.as_ref() {
            AppCredentials::Own {
                client_id,
                client_secret,
                redirect_uri,
                ..
            } => self
                .client
                .post(format!("{}/oauth/2.0/token", self.endpoints.oauth))
                .form(&[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("redirect_uri", redirect_uri.as_str()),
                ]),
            AppCredentials::Shared {
                client_id,
                redirect_uri,
            } => self
                .client
                .post(format!("{}/baiducloud/callback", self.endpoints.relay))
                .json(&json!({
                    "client_id": client_id,
                    "code": code,
                    "redirect_uri": redirect_uri,
                    "grant_type": "authorization_code",
                    "state": state,
                })),
        };

        let token = send_token_request(request)
            .await
            .map_err(|e| PanError::Authorization(e.to_string()))?
            .map_err(PanError::Authorization)?;

        let tokens = self.finish_authorization(token).await;
        info!("authorization completed");
        self.persist(&tokens).await
    }

    /// Get a valid access token, refreshing it if necessary.
    ///
    /// A rejected refresh token clears the stored tokens and returns
    /// [`PanError::TokenRefresh`]. Transport failures and server faults keep
    /// them, so a later call can retry the refresh.
    pub async fn get_access_token(&self) -> Result<String> {
        {
            let inner = self.inner.read().await;
            match inner.tokens.as_ref() {
                Some(token) if is_fresh(token) => return Ok(token.access_token.clone()),
                Some(_) => {}
                None => return Err(authorization_required()),
            }
        }

        // Callers queued on the write lock see the refreshed token.
        let mut inner = self.inner.write().await;
        let refresh_token = match inner.tokens.as_ref() {
            Some(token) if is_fresh(token) => return Ok(token.access_token.clone()),
            Some(token) => token.refresh_token.clone(),
            None => return Err(authorization_required()),
        };

        debug!("access token expired, refreshing");
        let token = match self.refresh_token(&refresh_token).await {
            Ok(token) => token,
            Err(e) => {
                if matches!(e, PanError::TokenRefresh(_)) {
                    warn!("refresh token rejected, authorization required");
                    inner.tokens = None;
                } else {
                    warn!(error = %e, "token refresh failed, keeping stored tokens");
                }
                return Err(e);
            }
        };

        let tokens = Tokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: now_secs() + token.expires_in,
        };
        inner.tokens = Some(tokens.clone());
        drop(inner);

        info!("access token refreshed");
        self.persist(&tokens).await?;
        Ok(tokens.access_token)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let request = match self.app.as_ref() {
            AppCredentials::Own {
                client_id,
                client_secret,
                ..
            } => self
                .client
                .get(format!("{}/oauth/2.0/token", self.endpoints.oauth))
                .query(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                ]),
            AppCredentials::Shared { client_id, .. } => self
                .client
                .post(format!("{}/baiducloud/refresh", self.endpoints.relay))
                .form(&[
                    ("client_id", client_id.as_str()),
                    ("refresh_token", refresh_token),
                ]),
        };

        send_token_request(request)
            .await?
            .map_err(PanError::TokenRefresh)
    }

    async fn fetch_relay_state(&self) -> Result<String> {
        let url = format!("{}/baiducloud/state", self.endpoints.relay);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PanError::Authorization(format!("cannot reach {}: {}", url, e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(PanError::Authorization(format!(
                "Status {}: {}",
                status, body
            )));
        }

        let value: Value = serde_json::from_str(&body)?;
        value
            .get("state")
            .or_else(|| value.get("data").and_then(|d| d.get("state")))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PanError::Authorization("relay returned no state".to_string()))
    }

    async fn finish_authorization(&self, token: TokenResponse) -> Tokens {
        let tokens = Tokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: now_secs() + token.expires_in,
        };
        let mut inner = self.inner.write().await;
        inner.tokens = Some(tokens.clone());
        inner.pending_state = None;
        tokens
    }

    async fn persist(&self, tokens: &Tokens) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let mut pairs = vec![
            (config::ACCESS_TOKEN, tokens.access_token.clone()),
            (config::REFRESH_TOKEN, tokens.refresh_token.clone()),
            (config::EXPIRES_AT, tokens.expires_at.to_string()),
        ];
        if self.app.is_shared() {
            pairs.push((config::CLIENT_ID, self.app.client_id().to_string()));
            pairs.push((config::REDIRECT_URI, self.app.redirect_uri().to_string()));
        }

        let mut store = store.lock().await;
        store.update(pairs)?;
        debug!(path = %store.path().display(), "tokens saved");
        Ok(())
    }
}

fn is_fresh(token: &Tokens) -> bool {
    token.expires_at > now_secs() + REFRESH_THRESHOLD_SECS
}

fn authorization_required() -> PanError {
    PanError::Authorization("not authorized yet, run the authorization flow first".to_string())
}

/// Send a token request. The inner error is the server rejecting the grant
/// (a 4xx status or an `error` body); the outer one covers transport failures
/// and server faults, which leave the grant usable.
async fn send_token_request(
    request: RequestBuilder,
) -> Result<std::result::Result<TokenResponse, String>> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status.is_server_error() {
        return Err(PanError::RemoteApi {
            code: status.as_u16() as i64,
            message: body,
        });
    }

    let value = match serde_json::from_str::<Value>(&body) {
        Ok(value) => value,
        Err(_) if status.is_client_error() => {
            return Ok(Err(format!("Status {}: {}", status, body)))
        }
        Err(e) => return Err(e.into()),
    };
    let parsed = TokenResponse::from_value(&value);
    if !status.is_success() {
        return Ok(Err(match parsed {
            Err(reason) => format!("Status {}: {}", status, reason),
            Ok(_) => format!("Status {}: {}", status, body),
        }));
    }
    Ok(parsed)
}

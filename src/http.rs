//! HTTP API client and the MiAuth authorization flow
//!
//! Endpoint calls are `POST {scheme}://{host}/api/{path}` with a JSON body
//! `{i?: token, ...payload}`. The authorization flow is out-of-band: the app
//! creates a session, directs the user to the confirmation page in a
//! browser, then polls the check endpoint until the session is consumed.

use crate::config::NotebusConfig;
use crate::error::{NotebusError, Result};
use crate::permissions::{Permission, PermissionSet};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// A bearer token and the permission scopes granted with it
///
/// Immutable once obtained. Produced by the authorization flow, or seeded
/// from [`NotebusConfig::with_token`] (in which case the scopes are unknown
/// and the credential is treated as fully scoped).
#[derive(Debug, Clone)]
pub struct Credential {
    token: String,
    permissions: PermissionSet,
}

impl Credential {
    pub fn new(token: impl Into<String>, permissions: PermissionSet) -> Self {
        Self {
            token: token.into(),
            permissions,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }
}

/// An in-flight authorization session
///
/// Created by [`HttpApi::authorize`], consumed exactly once by
/// [`HttpApi::wait_check`]. Discarded after the first terminal outcome.
#[derive(Debug, Clone)]
pub struct AuthSession {
    id: String,
    created_at: SystemTime,
}

impl AuthSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }
}

/// Options for [`HttpApi::wait_check_with`]
#[derive(Debug, Clone)]
pub struct WaitCheck {
    /// Cadence of check polls
    pub poll_interval: Duration,
    /// Overall budget; `None` polls until the session resolves
    pub timeout: Option<Duration>,
    /// Suppress per-poll progress logging. No protocol effect.
    pub silent: bool,
}

impl Default for WaitCheck {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            timeout: None,
            silent: false,
        }
    }
}

impl WaitCheck {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// Authorization state between `authorize` and `wait_check`
struct PendingAuth {
    session: AuthSession,
    requested: PermissionSet,
    url: Url,
}

/// Wire shape of the check endpoint response
#[derive(Debug, Default, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    token: Option<String>,
}

/// Client for the JSON HTTP API of one instance
pub struct HttpApi {
    config: NotebusConfig,
    http: reqwest::Client,
    credential: Arc<RwLock<Option<Credential>>>,
    pending: Mutex<Option<PendingAuth>>,
}

impl HttpApi {
    pub fn new(config: NotebusConfig) -> Self {
        let credential = config
            .token
            .clone()
            .map(|token| Credential::new(token, PermissionSet::all()));

        Self {
            config,
            http: reqwest::Client::new(),
            credential: Arc::new(RwLock::new(credential)),
            pending: Mutex::new(None),
        }
    }

    /// The current credential, if authorized
    pub fn credential(&self) -> Option<Credential> {
        self.credential.read().clone()
    }

    /// Shared credential cell, for the streaming session
    pub(crate) fn credential_cell(&self) -> Arc<RwLock<Option<Credential>>> {
        self.credential.clone()
    }

    pub(crate) fn config(&self) -> &NotebusConfig {
        &self.config
    }

    fn api_url(&self, path: &[&str]) -> String {
        format!(
            "{}://{}/api/{}",
            self.config.http_scheme(),
            self.config.host,
            path.join("/")
        )
    }

    /// Call an API endpoint.
    ///
    /// `path` is the ordered endpoint path (`["notes", "create"]` becomes
    /// `/api/notes/create`); `payload` is appended to the JSON body in
    /// order. The bearer token is attached automatically once authorized;
    /// before that, calls go out unauthenticated (some endpoints, like
    /// `stats`, accept this).
    pub async fn call(&self, path: &[&str], payload: &[(String, String)]) -> Result<Value> {
        let mut body = serde_json::Map::new();
        if let Some(credential) = self.credential.read().as_ref() {
            body.insert(
                "i".to_string(),
                Value::String(credential.token().to_string()),
            );
        }
        for (key, value) in payload {
            body.insert(key.clone(), Value::String(value.clone()));
        }

        let url = self.api_url(path);
        debug!(%url, "api call");

        let response = self.http.post(&url).json(&Value::Object(body)).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(NotebusError::Api {
                status: status.as_u16(),
                message: extract_error_message(&text),
            });
        }

        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| NotebusError::Api {
            status: status.as_u16(),
            message: format!("malformed response body: {e}"),
        })
    }

    /// Call an endpoint that requires specific permission scopes.
    ///
    /// Fails with [`NotebusError::PermissionDenied`] before issuing the
    /// request if the current credential lacks any required scope (or no
    /// credential is held).
    pub async fn call_with_permissions(
        &self,
        path: &[&str],
        payload: &[(String, String)],
        required: &[Permission],
    ) -> Result<Value> {
        {
            let credential = self.credential.read();
            for permission in required {
                let allowed = credential
                    .as_ref()
                    .is_some_and(|c| c.permissions().allows(*permission));
                if !allowed {
                    return Err(NotebusError::PermissionDenied(permission.scope()));
                }
            }
        }
        self.call(path, payload).await
    }

    /// Instance statistics; usable before authorization
    pub async fn stats(&self) -> Result<Value> {
        self.call(&["stats"], &[]).await
    }

    /// Begin the authorization flow.
    ///
    /// Creates a fresh session and builds the user-facing confirmation URI
    /// (`/miauth/{session}?name=&icon=&callback=&permission=`), retrievable
    /// via [`HttpApi::auth_url`]. The session itself is minted client-side;
    /// the instance learns about it when the user opens the URI. Directing
    /// the user there is the caller's job, typically by printing the URI or
    /// opening a browser.
    pub fn authorize(
        &self,
        name: &str,
        icon: Option<&str>,
        callback: Option<&str>,
        permissions: &[Permission],
    ) -> Result<AuthSession> {
        let session = AuthSession {
            id: Uuid::new_v4().to_string(),
            created_at: SystemTime::now(),
        };
        let requested: PermissionSet = permissions.iter().copied().collect();

        let mut url = Url::parse(&format!(
            "{}://{}/miauth/{}",
            self.config.http_scheme(),
            self.config.host,
            session.id
        ))
        .map_err(|e| NotebusError::Protocol(format!("invalid instance host: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("name", name);
            if let Some(icon) = icon {
                query.append_pair("icon", icon);
            }
            if let Some(callback) = callback {
                query.append_pair("callback", callback);
            }
            if !requested.is_empty() {
                query.append_pair("permission", &requested.scopes().join(","));
            }
        }

        info!(session = %session.id, "authorization session created");
        *self.pending.lock() = Some(PendingAuth {
            session: session.clone(),
            requested,
            url,
        });
        Ok(session)
    }

    /// Confirmation URI of the pending authorization session
    pub fn auth_url(&self) -> Option<Url> {
        self.pending.lock().as_ref().map(|p| p.url.clone())
    }

    /// Poll the pending session with the config's interval and budget
    pub async fn wait_check(&self) -> Result<bool> {
        let opts = WaitCheck {
            poll_interval: self.config.poll_interval,
            timeout: self.config.wait_timeout,
            silent: false,
        };
        self.wait_check_with(opts).await
    }

    /// Poll the check endpoint until the pending session resolves.
    ///
    /// Returns `Ok(true)` when the user approved (the granted credential is
    /// stored and attached to subsequent calls), `Ok(false)` when the
    /// session was consumed without granting a token (denied),
    /// [`NotebusError::Timeout`] when the budget runs out, and
    /// [`NotebusError::Api`] immediately for a definitive check failure
    /// (e.g. an invalid session). Transient transport errors are retried
    /// within the budget. The session is consumed whatever the outcome.
    ///
    /// Cancel-safe: dropping the future abandons this wait only.
    pub async fn wait_check_with(&self, opts: WaitCheck) -> Result<bool> {
        let pending = self.pending.lock().take().ok_or_else(|| {
            NotebusError::Protocol("wait_check without a pending authorization session".into())
        })?;

        let url = self.api_url(&["miauth", pending.session.id(), "check"]);
        match opts.timeout {
            Some(budget) => tokio::time::timeout(budget, self.poll_check(&url, &pending, &opts))
                .await
                .map_err(|_| NotebusError::Timeout)?,
            None => self.poll_check(&url, &pending, &opts).await,
        }
    }

    async fn poll_check(&self, url: &str, pending: &PendingAuth, opts: &WaitCheck) -> Result<bool> {
        let mut polls: u64 = 0;
        loop {
            polls += 1;
            match self.check_once(url).await {
                Ok(CheckOutcome::Granted(token)) => {
                    *self.credential.write() =
                        Some(Credential::new(token, pending.requested.clone()));
                    if !opts.silent {
                        info!(polls, "authorization granted");
                    }
                    return Ok(true);
                }
                Ok(CheckOutcome::Denied) => {
                    if !opts.silent {
                        info!(polls, "authorization denied");
                    }
                    return Ok(false);
                }
                Ok(CheckOutcome::Pending) => {
                    if !opts.silent {
                        info!(polls, "authorization pending");
                    }
                }
                Err(NotebusError::Http(e)) => {
                    // Transient transport failure: retry within the budget
                    warn!(error = %e, "authorization check failed, retrying");
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(opts.poll_interval).await;
        }
    }

    async fn check_once(&self, url: &str) -> Result<CheckOutcome> {
        let response = self
            .http
            .post(url)
            .json(&Value::Object(serde_json::Map::new()))
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            // Invalid session: definitive, surfaces immediately
            return Err(NotebusError::Api {
                status: status.as_u16(),
                message: extract_error_message(&text),
            });
        }

        let check: CheckResponse = serde_json::from_str(&text).map_err(|e| NotebusError::Api {
            status: status.as_u16(),
            message: format!("malformed check response: {e}"),
        })?;

        Ok(if !check.ok {
            CheckOutcome::Pending
        } else {
            match check.token {
                Some(token) => CheckOutcome::Granted(token),
                None => CheckOutcome::Denied,
            }
        })
    }
}

enum CheckOutcome {
    Pending,
    Granted(String),
    Denied,
}

/// Pull a human-readable message out of an API error body
fn extract_error_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => match value.get("error") {
            Some(error) => error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
            None => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionKind;

    fn api() -> HttpApi {
        HttpApi::new(NotebusConfig::new("misskey.example"))
    }

    #[test]
    fn test_api_url() {
        let api = api();
        assert_eq!(
            api.api_url(&["notes", "create"]),
            "https://misskey.example/api/notes/create"
        );
        assert_eq!(api.api_url(&["stats"]), "https://misskey.example/api/stats");
    }

    #[test]
    fn test_authorize_builds_confirmation_url() {
        let api = api();
        let session = api
            .authorize(
                "Example app",
                None,
                None,
                &[
                    Permission::Read(PermissionKind::Account),
                    Permission::Write(PermissionKind::Notes),
                ],
            )
            .unwrap();

        let url = api.auth_url().unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("misskey.example"));
        assert_eq!(url.path(), format!("/miauth/{}", session.id()));

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("name".to_string(), "Example app".to_string())));
        assert!(pairs.contains(&(
            "permission".to_string(),
            "read:account,write:notes".to_string()
        )));
    }

    #[test]
    fn test_authorize_with_icon_and_callback() {
        let api = api();
        api.authorize(
            "app",
            Some("https://example.com/icon.png"),
            Some("https://example.com/cb?x=1"),
            &[],
        )
        .unwrap();

        let url = api.auth_url().unwrap();
        let query: std::collections::HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            query.get("icon").map(String::as_str),
            Some("https://example.com/icon.png")
        );
        assert_eq!(
            query.get("callback").map(String::as_str),
            Some("https://example.com/cb?x=1")
        );
        // No permissions requested, no permission parameter
        assert!(!query.contains_key("permission"));
    }

    #[test]
    fn test_auth_url_none_before_authorize() {
        assert!(api().auth_url().is_none());
    }

    #[tokio::test]
    async fn test_wait_check_without_authorize() {
        let result = api().wait_check().await;
        assert!(matches!(result, Err(NotebusError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_call_with_permissions_no_credential() {
        let result = api()
            .call_with_permissions(
                &["notes", "create"],
                &[],
                &[Permission::Write(PermissionKind::Notes)],
            )
            .await;
        match result {
            Err(NotebusError::PermissionDenied(scope)) => assert_eq!(scope, "write:notes"),
            other => panic!("expected PermissionDenied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_with_permissions_missing_scope() {
        let api = api();
        *api.credential.write() = Some(Credential::new(
            "T",
            [Permission::Read(PermissionKind::Account)].into_iter().collect(),
        ));

        let result = api
            .call_with_permissions(
                &["notes", "create"],
                &[],
                &[Permission::Write(PermissionKind::Notes)],
            )
            .await;
        assert!(matches!(result, Err(NotebusError::PermissionDenied(_))));
    }

    #[test]
    fn test_preseeded_token_is_fully_scoped() {
        let api = HttpApi::new(NotebusConfig::new("misskey.example").with_token("seed"));
        let credential = api.credential().unwrap();
        assert_eq!(credential.token(), "seed");
        assert!(credential.permissions().can_write(PermissionKind::Notes));
    }

    #[test]
    fn test_extract_error_message() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"no such note","code":"NO_SUCH_NOTE"}}"#),
            "no such note"
        );
        assert_eq!(extract_error_message(r#"{"error":"plain"}"#), r#""plain""#);
        assert_eq!(extract_error_message("gateway timeout"), "gateway timeout");
    }
}

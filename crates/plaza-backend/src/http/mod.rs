//! HTTP implementation of [`Backend`]
//!
//! Speaks the hosted service's REST table API, auth API and storage API with
//! `reqwest`, and its realtime websocket protocol through [`socket`]. The auth
//! session lives in memory and, when configured, in a JSON file so a later run
//! can resume it.

mod socket;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::{AuthUser, Credentials, Session};
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::query::{Delete, Filter, Insert, Query, Update};
use crate::realtime::{ChangeFilter, ChangeSubscription};
use crate::storage::{self, Upload};
use crate::Backend;

/// Seconds before expiry at which a session is refreshed
const REFRESH_LEEWAY_SECS: i64 = 60;

/// Accept header asking the table API for a single JSON object
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Auth session shared between request paths and realtime connections
struct SessionStore {
    client: reqwest::Client,
    auth_base: String,
    anon_key: String,
    file: Option<PathBuf>,
    current: RwLock<Option<Session>>,
}

impl SessionStore {
    fn held(&self) -> Option<Session> {
        self.current.read().clone()
    }

    async fn install(&self, session: Session) -> Result<(), BackendError> {
        if let Some(path) = &self.file {
            session.save(path).await?;
        }
        *self.current.write() = Some(session);
        Ok(())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        self.current.write().take();
        if let Some(path) = &self.file {
            Session::forget(path).await?;
        }
        Ok(())
    }

    /// Load the persisted session if none is held, refreshing it when expired
    async fn ensure(&self) -> Result<Option<Session>, BackendError> {
        let session = match self.held() {
            Some(session) => Some(session),
            None => match &self.file {
                Some(path) => Session::load(path).await?,
                None => None,
            },
        };

        let Some(session) = session else {
            return Ok(None);
        };

        let now = chrono::Utc::now().timestamp();
        if session.is_expired(now, REFRESH_LEEWAY_SECS) {
            tracing::debug!("access token expired, refreshing session");
            match self.refresh(&session.refresh_token).await {
                Ok(fresh) => {
                    self.install(fresh.clone()).await?;
                    return Ok(Some(fresh));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "session refresh failed, dropping session");
                    self.clear().await?;
                    return Ok(None);
                }
            }
        }

        if self.current.read().is_none() {
            *self.current.write() = Some(session.clone());
        }
        Ok(Some(session))
    }

    /// Bearer for the next request: a live access token, or the anon key
    async fn bearer(&self) -> Result<String, BackendError> {
        Ok(self
            .ensure()
            .await?
            .map_or_else(|| self.anon_key.clone(), |s| s.access_token))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, BackendError> {
        let response = self
            .client
            .post(format!("{}/token?grant_type=refresh_token", self.auth_base))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.into_session())
    }
}

#[async_trait]
impl socket::TokenSource for SessionStore {
    async fn access_token(&self) -> String {
        match self.bearer().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "could not renew realtime token");
                self.anon_key.clone()
            }
        }
    }
}

/// Client for the hosted backend
pub struct HttpBackend {
    config: BackendConfig,
    client: reqwest::Client,
    sessions: Arc<SessionStore>,
}

impl HttpBackend {
    /// Build a client from config
    ///
    /// # Errors
    /// - `BackendError::Config` if the URL or key is missing
    /// - `BackendError::Transport` if the HTTP client cannot be built
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        let apikey = HeaderValue::from_str(&config.anon_key)
            .map_err(|e| BackendError::Config(format!("invalid anon key: {e}")))?;
        headers.insert("apikey", apikey);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()?;

        let sessions = Arc::new(SessionStore {
            client: client.clone(),
            auth_base: format!("{}/auth/v1", config.base_url()),
            anon_key: config.anon_key.clone(),
            file: config.session_file.clone(),
            current: RwLock::new(None),
        });

        Ok(Self {
            config,
            client,
            sessions,
        })
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Currently held session
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.sessions.held()
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url(), table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.base_url(), path)
    }

    fn storage_url(&self, path: &str) -> String {
        format!("{}/storage/v1/{}", self.config.base_url(), path)
    }

    /// Request carrying the current bearer, refreshing an expired session first
    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, BackendError> {
        let bearer = self.sessions.bearer().await?;
        Ok(self
            .client
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {bearer}")))
    }

    async fn table_request(
        &self,
        method: Method,
        table: &str,
    ) -> Result<RequestBuilder, BackendError> {
        let profile_header = if method == Method::GET {
            "Accept-Profile"
        } else {
            "Content-Profile"
        };
        Ok(self
            .request(method, &self.rest_url(table))
            .await?
            .header(profile_header, self.config.schema.as_str()))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("url", &self.config.url)
            .field("signed_in", &self.sessions.current.read().is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthUser, BackendError> {
        tracing::debug!(email = %credentials.email, "signing up");
        let response = self
            .send(
                self.client
                    .post(self.auth_url("signup"))
                    .json(&json!({ "email": credentials.email, "password": credentials.password })),
            )
            .await
            .map_err(auth_error)?;

        match response.json::<SignUpResponse>().await? {
            SignUpResponse::Session(token) => {
                let session = token.into_session();
                let user = session.user.clone();
                self.sessions.install(session).await?;
                Ok(user)
            }
            // Email confirmation pending: account exists but no session yet
            SignUpResponse::User(user) => Ok(user),
        }
    }

    async fn sign_in_with_password(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthUser, BackendError> {
        tracing::debug!(email = %credentials.email, "signing in");
        let response = self
            .send(
                self.client
                    .post(self.auth_url("token?grant_type=password"))
                    .json(&json!({ "email": credentials.email, "password": credentials.password })),
            )
            .await
            .map_err(auth_error)?;

        let session = response.json::<TokenResponse>().await?.into_session();
        let user = session.user.clone();
        self.sessions.install(session).await?;
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        if self.sessions.ensure().await?.is_some() {
            let result = match self.request(Method::POST, &self.auth_url("logout")).await {
                Ok(request) => self.send(request).await.map(drop),
                Err(e) => Err(e),
            };
            self.sessions.clear().await?;
            result?;
        }
        Ok(())
    }

    async fn get_user(&self) -> Result<Option<AuthUser>, BackendError> {
        if self.sessions.ensure().await?.is_none() {
            return Ok(None);
        }

        let response = self
            .request(Method::GET, &self.auth_url("user"))
            .await?
            .send()
            .await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                tracing::info!("stored session rejected by auth service");
                self.sessions.clear().await?;
                Ok(None)
            }
            status if status.is_success() => Ok(Some(response.json::<AuthUser>().await?)),
            _ => Err(error_from_response(response).await),
        }
    }

    async fn update_password(&self, new_password: &str) -> Result<(), BackendError> {
        if self.sessions.ensure().await?.is_none() {
            return Err(BackendError::Unauthenticated);
        }
        self.send(
            self.request(Method::PUT, &self.auth_url("user"))
                .await?
                .json(&json!({ "password": new_password })),
        )
        .await
        .map_err(auth_error)?;
        Ok(())
    }

    async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError> {
        let mut request = self
            .table_request(Method::GET, query.table_name())
            .await?
            .query(&query.to_params());
        if query.is_single() {
            request = request.header(ACCEPT, SINGLE_OBJECT);
        }

        let response = request.send().await?;
        if query.is_single() && response.status() == StatusCode::NOT_ACCEPTABLE {
            return Err(BackendError::not_found(query.table_name()));
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        if query.is_single() {
            Ok(vec![response.json::<Value>().await?])
        } else {
            Ok(response.json::<Vec<Value>>().await?)
        }
    }

    async fn insert(&self, insert: &Insert) -> Result<Vec<Value>, BackendError> {
        let mut request = self
            .table_request(Method::POST, insert.table_name())
            .await?
            .json(insert.rows());
        match insert.returning_columns() {
            Some(columns) => {
                request = request
                    .header("Prefer", "return=representation")
                    .query(&[("select", columns)]);
                let response = self.send(request).await?;
                Ok(response.json::<Vec<Value>>().await?)
            }
            None => {
                self.send(request.header("Prefer", "return=minimal")).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn update(&self, update: &Update) -> Result<(), BackendError> {
        let params: Vec<_> = update.filters().iter().map(Filter::to_param).collect();
        self.send(
            self.table_request(Method::PATCH, update.table_name())
                .await?
                .header("Prefer", "return=minimal")
                .query(&params)
                .json(update.values()),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, delete: &Delete) -> Result<(), BackendError> {
        let params: Vec<_> = delete.filters().iter().map(Filter::to_param).collect();
        self.send(
            self.table_request(Method::DELETE, delete.table_name())
                .await?
                .query(&params),
        )
        .await?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        upload: &Upload,
    ) -> Result<(), BackendError> {
        tracing::debug!(bucket, path, bytes = upload.len(), "uploading object");
        self.send(
            self.request(Method::POST, &self.storage_url(&format!("object/{bucket}/{path}")))
                .await?
                .header(CONTENT_TYPE, upload.content_type.as_str())
                .header("cache-control", "max-age=3600")
                .header("x-upsert", "false")
                .body(upload.bytes.clone()),
        )
        .await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        storage::public_url(self.config.base_url(), bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), BackendError> {
        if paths.is_empty() {
            return Ok(());
        }
        self.send(
            self.request(Method::DELETE, &self.storage_url(&format!("object/{bucket}")))
                .await?
                .json(&json!({ "prefixes": paths })),
        )
        .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        filters: &[ChangeFilter],
    ) -> Result<ChangeSubscription, BackendError> {
        let url = socket::websocket_url(self.config.base_url(), &self.config.anon_key)?;
        socket::join(
            &url,
            channel,
            filters.to_vec(),
            self.sessions.clone(),
            self.config.heartbeat(),
        )
        .await
    }
}

/// Token response of sign-in / refresh
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self.expires_at.or_else(|| {
            self.expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs)
        });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Sign-up answers with a session, or only a user when confirmation is pending
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(AuthUser),
}

/// Turn 4xx auth failures into `BackendError::Auth` with the service message
fn auth_error(err: BackendError) -> BackendError {
    match err {
        BackendError::Api { status, message } if (400..500).contains(&status) => {
            BackendError::Auth(message)
        }
        other => other,
    }
}

async fn error_from_response(response: Response) -> BackendError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    BackendError::api(status, extract_message(status, &body))
}

/// Pick the human-readable message out of an error body
fn extract_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["message", "msg", "error_description", "error"] {
            if let Some(Value::String(message)) = map.get(key) {
                return message.clone();
            }
        }
    }
    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use socket::TokenSource;

    fn backend() -> HttpBackend {
        HttpBackend::new(BackendConfig::new("https://demo.supabase.co/", "anon")).unwrap()
    }

    #[test]
    fn urls_are_built_from_base() {
        let backend = backend();
        assert_eq!(
            backend.rest_url("posts"),
            "https://demo.supabase.co/rest/v1/posts"
        );
        assert_eq!(
            backend.auth_url("token?grant_type=password"),
            "https://demo.supabase.co/auth/v1/token?grant_type=password"
        );
        assert_eq!(
            backend.public_url("avatars", "u1_17"),
            "https://demo.supabase.co/storage/v1/object/public/avatars/u1_17"
        );
    }

    fn session(access_token: &str, expires_at: i64) -> Session {
        Session {
            access_token: access_token.into(),
            refresh_token: "r".into(),
            expires_at: Some(expires_at),
            user: AuthUser {
                id: uuid::Uuid::new_v4(),
                email: Some("ana@example.com".into()),
            },
        }
    }

    /// Serve `router` on a loopback port and return its base URL
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Auth endpoint answering every refresh with `fresh`, plus a `posts`
    /// table recording the bearer of each read
    async fn service(bearers: Arc<Mutex<Vec<String>>>) -> String {
        let router = Router::new()
            .route(
                "/auth/v1/token",
                post(|| async {
                    Json(json!({
                        "access_token": "fresh",
                        "refresh_token": "r2",
                        "expires_in": 3600,
                        "user": { "id": "1c9a2a9e-55b4-4a1f-9d3e-0a8d1d7c2b11" }
                    }))
                }),
            )
            .route(
                "/rest/v1/posts",
                get(move |headers: axum::http::HeaderMap| {
                    let bearers = bearers.clone();
                    async move {
                        let bearer = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        bearers.lock().push(bearer);
                        Json(json!([{ "id": 1, "content": "hello" }]))
                    }
                }),
            );
        serve(router).await
    }

    #[tokio::test]
    async fn bearer_falls_back_to_anon_key() {
        let backend = backend();
        assert_eq!(backend.sessions.bearer().await.unwrap(), "anon");

        let later = chrono::Utc::now().timestamp() + 3600;
        *backend.sessions.current.write() = Some(session("jwt", later));
        assert_eq!(backend.sessions.bearer().await.unwrap(), "jwt");
    }

    #[tokio::test]
    async fn expired_session_is_refreshed_before_table_reads() {
        let bearers = Arc::new(Mutex::new(Vec::new()));
        let url = service(bearers.clone()).await;
        let backend = HttpBackend::new(BackendConfig::new(url, "anon")).unwrap();
        let past = chrono::Utc::now().timestamp() - 10;
        *backend.sessions.current.write() = Some(session("stale", past));

        let rows = backend.select(&Query::table("posts")).await.unwrap();

        assert_eq!(rows, vec![json!({ "id": 1, "content": "hello" })]);
        assert_eq!(*bearers.lock(), vec!["Bearer fresh".to_string()]);
        assert_eq!(backend.session().unwrap().access_token, "fresh");
    }

    #[tokio::test]
    async fn realtime_token_follows_refresh() {
        let url = service(Arc::new(Mutex::new(Vec::new()))).await;
        let backend = HttpBackend::new(BackendConfig::new(url, "anon")).unwrap();
        let past = chrono::Utc::now().timestamp() - 10;
        *backend.sessions.current.write() = Some(session("stale", past));

        let source: Arc<dyn TokenSource> = backend.sessions.clone();
        assert_eq!(source.access_token().await, "fresh");
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(matches!(
            HttpBackend::new(BackendConfig::default()),
            Err(BackendError::Config(_))
        ));
    }

    #[test]
    fn message_extraction_prefers_known_keys() {
        assert_eq!(
            extract_message(StatusCode::BAD_REQUEST, r#"{"code":"23505","message":"duplicate key"}"#),
            "duplicate key"
        );
        assert_eq!(
            extract_message(
                StatusCode::BAD_REQUEST,
                r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#
            ),
            "Invalid login credentials"
        );
        assert_eq!(extract_message(StatusCode::BAD_GATEWAY, ""), "Bad Gateway");
        assert_eq!(extract_message(StatusCode::BAD_REQUEST, "plain text "), "plain text");
    }

    #[test]
    fn auth_errors_are_reclassified() {
        let err = auth_error(BackendError::api(StatusCode::BAD_REQUEST, "Invalid login credentials"));
        assert!(matches!(err, BackendError::Auth(ref m) if m == "Invalid login credentials"));

        let err = auth_error(BackendError::api(StatusCode::INTERNAL_SERVER_ERROR, "boom"));
        assert!(matches!(err, BackendError::Api { status: 500, .. }));
    }

    #[test]
    fn token_response_computes_expiry() {
        let token: TokenResponse = serde_json::from_value(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "user": { "id": "1c9a2a9e-55b4-4a1f-9d3e-0a8d1d7c2b11", "email": "ana@example.com" }
        }))
        .unwrap();
        let now = chrono::Utc::now().timestamp();
        let session = token.into_session();
        let expires_at = session.expires_at.unwrap();
        assert!(expires_at >= now + 3590 && expires_at <= now + 3610);
        assert_eq!(session.user.email.as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn sign_up_response_variants() {
        let pending: SignUpResponse = serde_json::from_value(json!({
            "id": "1c9a2a9e-55b4-4a1f-9d3e-0a8d1d7c2b11",
            "email": "ana@example.com",
            "aud": "authenticated"
        }))
        .unwrap();
        assert!(matches!(pending, SignUpResponse::User(_)));

        let signed_in: SignUpResponse = serde_json::from_value(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_at": 10,
            "user": { "id": "1c9a2a9e-55b4-4a1f-9d3e-0a8d1d7c2b11" }
        }))
        .unwrap();
        assert!(matches!(signed_in, SignUpResponse::Session(_)));
    }

    #[tokio::test]
    async fn persisted_session_is_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let stored = Session {
            access_token: "jwt".into(),
            refresh_token: "r".into(),
            expires_at: Some(chrono::Utc::now().timestamp() + 3600),
            user: AuthUser {
                id: uuid::Uuid::new_v4(),
                email: Some("ana@example.com".into()),
            },
        };
        stored.save(&path).await.unwrap();

        let backend = HttpBackend::new(
            BackendConfig::new("https://demo.supabase.co", "anon").with_session_file(&path),
        )
        .unwrap();
        assert!(backend.session().is_none());

        let resumed = backend.sessions.ensure().await.unwrap();
        assert_eq!(resumed, Some(stored.clone()));
        assert_eq!(backend.session(), Some(stored));
        assert_eq!(backend.sessions.bearer().await.unwrap(), "jwt");
    }
}

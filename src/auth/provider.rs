//! Identity-provider client (user-pool service).
//!
//! The portal's user pool exposes one JSON route per auth operation; every
//! response deserializes into a typed struct at this boundary, and every
//! failure body (`{code, message}`) maps onto an [`AuthError`] variant.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Timeout for identity-provider calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 10;

// ── Error taxonomy ──────────────────────────────────────────────────

/// The identity provider rejected an operation, or could not be reached.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("incorrect email or password")]
    NotAuthorized,
    #[error("account is not confirmed — check your inbox for the verification code")]
    UserNotConfirmed,
    #[error("no account exists for that email")]
    UserNotFound,
    #[error("an account with that email already exists")]
    UsernameExists,
    #[error("verification code does not match")]
    CodeMismatch,
    #[error("verification code has expired — request a new one")]
    CodeExpired,
    #[error("password does not meet the account requirements")]
    WeakPassword,
    #[error("too many attempts — try again later")]
    LimitExceeded,
    #[error("identity provider rejected the request: {0}")]
    Provider(String),
    #[error("identity provider unreachable: {0}")]
    Network(#[from] reqwest::Error),
}

/// Typed failure body returned by the user pool.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

/// Map a provider failure reason onto the error taxonomy.
fn map_reason(code: &str, message: &str) -> AuthError {
    match code {
        "not_authorized" => AuthError::NotAuthorized,
        "user_not_confirmed" => AuthError::UserNotConfirmed,
        "user_not_found" => AuthError::UserNotFound,
        "username_exists" => AuthError::UsernameExists,
        "code_mismatch" => AuthError::CodeMismatch,
        "expired_code" => AuthError::CodeExpired,
        "invalid_password" => AuthError::WeakPassword,
        "limit_exceeded" => AuthError::LimitExceeded,
        _ => AuthError::Provider(if message.is_empty() {
            code.to_string()
        } else {
            message.to_string()
        }),
    }
}

// ── Wire types ──────────────────────────────────────────────────────

/// Token material returned by sign-in and session-refresh.
#[derive(Debug, Deserialize)]
pub struct AuthTokens {
    pub id_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Identity-token lifetime in seconds.
    pub expires_in: u64,
}

/// Receipt for a registration awaiting confirmation.
#[derive(Debug, Clone, Deserialize)]
pub struct SignupReceipt {
    #[serde(default)]
    pub user_confirmed: bool,
    /// Where the verification code was sent (masked by the provider).
    #[serde(default)]
    pub code_delivery_destination: Option<String>,
}

/// Receipt for a reset-code dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct ResetDispatch {
    #[serde(default)]
    pub code_delivery_destination: Option<String>,
}

#[derive(Debug, Serialize)]
struct CredentialsRequest<'a> {
    client_id: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    client_id: &'a str,
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct ConfirmRequest<'a> {
    client_id: &'a str,
    email: &'a str,
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct ResetRequest<'a> {
    client_id: &'a str,
    email: &'a str,
    code: &'a str,
    new_password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    client_id: &'a str,
    refresh_token: &'a str,
}

// ── Provider seam ───────────────────────────────────────────────────

/// Client contract of the user-pool service: credentials in, token material
/// or a typed failure reason out.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthTokens, AuthError>;
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignupReceipt, AuthError>;
    async fn confirm_sign_up(&self, email: &str, code: &str) -> Result<(), AuthError>;
    async fn forgot_password(&self, email: &str) -> Result<ResetDispatch, AuthError>;
    async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), AuthError>;
    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError>;
}

/// HTTP implementation against the portal's user pool.
pub struct UserPoolClient {
    base_url: String,
    client_id: String,
    client: Client,
}

impl UserPoolClient {
    pub fn new(base_url: &str, client_id: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    async fn post<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, AuthError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        match response.json::<ErrorBody>().await {
            Ok(err) => Err(map_reason(&err.code, &err.message)),
            Err(_) => Err(AuthError::Provider(format!(
                "unexpected response ({status})"
            ))),
        }
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AuthError> {
        Ok(self.post(path, body).await?.json::<T>().await?)
    }
}

#[async_trait]
impl IdentityProvider for UserPoolClient {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthTokens, AuthError> {
        self.post_json(
            "/signin",
            &CredentialsRequest {
                client_id: &self.client_id,
                email,
                password,
            },
        )
        .await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignupReceipt, AuthError> {
        self.post_json(
            "/signup",
            &CredentialsRequest {
                client_id: &self.client_id,
                email,
                password,
            },
        )
        .await
    }

    async fn confirm_sign_up(&self, email: &str, code: &str) -> Result<(), AuthError> {
        self.post(
            "/confirm",
            &ConfirmRequest {
                client_id: &self.client_id,
                email,
                code,
            },
        )
        .await?;
        Ok(())
    }

    async fn forgot_password(&self, email: &str) -> Result<ResetDispatch, AuthError> {
        self.post_json(
            "/forgot",
            &EmailRequest {
                client_id: &self.client_id,
                email,
            },
        )
        .await
    }

    async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        self.post(
            "/reset",
            &ResetRequest {
                client_id: &self.client_id,
                email,
                code,
                new_password,
            },
        )
        .await?;
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        self.post_json(
            "/refresh",
            &RefreshRequest {
                client_id: &self.client_id,
                refresh_token,
            },
        )
        .await
    }
}

//! Session management for the portal identity.
//!
//! One owned state machine per process: `Loading → {Authenticated |
//! Unauthenticated}` after the startup restoration, `Unauthenticated →
//! Authenticated` on sign-in, and back on sign-out or refresh-credential
//! invalidation. All transitions happen inside [`SessionManager`] methods;
//! consumers read snapshots.

pub mod provider;
pub mod session;
pub mod store;

pub use provider::{
    AuthError, AuthTokens, IdentityProvider, ResetDispatch, SignupReceipt, UserPoolClient,
};
pub use session::Session;
pub use store::CredentialStore;

use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::security::SecretStore;

/// Failure of a session-manager operation, surfaced to the caller as a
/// human-readable message. The flow stays resubmittable; nothing here is
/// fatal to the process.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("request timed out after {0:?} — check your connection and try again")]
    Timeout(Duration),
    #[error("credential store failure: {0}")]
    Store(#[source] anyhow::Error),
}

/// Authentication state of this process.
#[derive(Debug, Clone)]
pub enum AuthState {
    /// Startup restoration has not resolved yet. Authenticated-only reads
    /// must answer as unauthenticated until it does.
    Loading,
    Unauthenticated,
    Authenticated(Session),
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

/// Handle for a registration awaiting its emailed verification code.
#[derive(Debug, Clone)]
pub struct PendingSignup {
    pub email: String,
    /// Masked delivery destination reported by the provider.
    pub destination: Option<String>,
    pub user_confirmed: bool,
}

/// Owns the authenticated identity (or lack thereof) and the refresh
/// credential's two storage locations.
pub struct SessionManager {
    provider: Box<dyn IdentityProvider>,
    store: CredentialStore,
    state: Mutex<AuthState>,
    forgot_timeout: Duration,
}

impl SessionManager {
    pub fn new(config: &Config) -> Self {
        let secrets = SecretStore::new(&config.benchgate_dir, config.secrets.encrypt);
        let store = CredentialStore::new(&config.benchgate_dir, secrets);
        let provider = Box::new(UserPoolClient::new(
            &config.identity.base_url,
            &config.identity.client_id,
        ));
        Self::with_provider(
            provider,
            store,
            Duration::from_secs(config.identity.forgot_timeout_secs),
        )
    }

    /// Assemble from parts. The provider seam is what tests point at a
    /// mock user pool.
    pub fn with_provider(
        provider: Box<dyn IdentityProvider>,
        store: CredentialStore,
        forgot_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            state: Mutex::new(AuthState::Loading),
            forgot_timeout,
        }
    }

    /// Snapshot of the current authentication state.
    pub fn state(&self) -> AuthState {
        self.state.lock().clone()
    }

    /// Whether a session is currently held. `Loading` reads as false.
    pub fn is_authenticated(&self) -> bool {
        self.state.lock().is_authenticated()
    }

    /// Startup silent restoration: exchange a stored refresh credential for
    /// a fresh session. Resolves the `Loading` state one way or the other;
    /// failures are logged, never surfaced. Idempotent.
    pub async fn restore(&self) -> Option<Session> {
        {
            let mut state = self.state.lock();
            if let AuthState::Authenticated(session) = &*state {
                if session.is_valid() {
                    return Some(session.clone());
                }
            }
            *state = AuthState::Loading;
        }

        let staged = match self.store.stage().await {
            Ok(Some(slot)) => slot,
            Ok(None) => {
                debug!("no stored refresh credential");
                *self.state.lock() = AuthState::Unauthenticated;
                return None;
            }
            Err(e) => {
                warn!("refresh credential unreadable: {e:#}");
                *self.state.lock() = AuthState::Unauthenticated;
                return None;
            }
        };

        let result = self.provider.refresh(staged.token()).await;
        let previous_refresh = staged.token().to_string();
        // The transient slot must not outlive the refresh call.
        drop(staged);

        match result {
            Ok(tokens) => {
                let rotated = tokens.refresh_token.clone();
                let session = Session::new(
                    tokens.id_token,
                    rotated.clone().unwrap_or(previous_refresh),
                    tokens.expires_in,
                );
                if let Some(new_credential) = rotated {
                    if let Err(e) = self.store.store(&new_credential).await {
                        warn!("failed to persist rotated refresh credential: {e:#}");
                    }
                }
                info!("session restored");
                *self.state.lock() = AuthState::Authenticated(session.clone());
                Some(session)
            }
            Err(AuthError::Network(e)) => {
                // Provider unreachable: keep the credential for a later retry.
                warn!("session restore failed: {e}");
                *self.state.lock() = AuthState::Unauthenticated;
                None
            }
            Err(e) => {
                info!("stored refresh credential rejected: {e}");
                if let Err(e) = self.store.clear() {
                    warn!("failed to erase rejected credential: {e:#}");
                }
                *self.state.lock() = AuthState::Unauthenticated;
                None
            }
        }
    }

    /// Authenticate with email and password. On success the refresh
    /// credential is persisted to the durable store and an active session
    /// is returned.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, SessionError> {
        let tokens = self.provider.sign_in(email, password).await?;
        let refresh_token = tokens.refresh_token.ok_or_else(|| {
            SessionError::Auth(AuthError::Provider(
                "sign-in response carried no refresh credential".to_string(),
            ))
        })?;

        let session = Session::new(tokens.id_token, refresh_token.clone(), tokens.expires_in);
        self.store
            .store(&refresh_token)
            .await
            .map_err(SessionError::Store)?;

        info!("signed in");
        *self.state.lock() = AuthState::Authenticated(session.clone());
        Ok(session)
    }

    /// Register a new identity. Returns a pending-confirmation handle.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<PendingSignup, SessionError> {
        let receipt = self.provider.sign_up(email, password).await?;
        Ok(PendingSignup {
            email: email.to_string(),
            destination: receipt.code_delivery_destination,
            user_confirmed: receipt.user_confirmed,
        })
    }

    /// Exchange an emailed verification code for a confirmed account.
    pub async fn confirm_sign_up(&self, email: &str, code: &str) -> Result<(), SessionError> {
        self.provider.confirm_sign_up(email, code).await?;
        Ok(())
    }

    /// Trigger a reset-code dispatch, bounded by the configured timeout.
    pub async fn forgot_password(&self, email: &str) -> Result<ResetDispatch, SessionError> {
        match tokio::time::timeout(self.forgot_timeout, self.provider.forgot_password(email)).await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(SessionError::Timeout(self.forgot_timeout)),
        }
    }

    /// Finalize a password change with the emailed reset code.
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), SessionError> {
        self.provider.reset_password(email, code, new_password).await?;
        Ok(())
    }

    /// Invalidate the local session and erase the persisted refresh
    /// credential. Safe to call with no active session.
    pub fn sign_out(&self) {
        *self.state.lock() = AuthState::Unauthenticated;
        if let Err(e) = self.store.clear() {
            warn!("failed to erase refresh credential: {e:#}");
        }
        info!("signed out");
    }

    /// The current valid session, or `None`. Checks freshness rather than a
    /// cached flag; a lapsed identity token triggers one silent refresh
    /// attempt before answering.
    pub async fn session(&self) -> Option<Session> {
        let snapshot = match &*self.state.lock() {
            AuthState::Authenticated(session) => Some(session.clone()),
            _ => None,
        };

        match snapshot {
            Some(session) if session.is_valid() => Some(session),
            Some(_) => {
                debug!("identity token lapsed — attempting silent refresh");
                self.restore().await
            }
            None => None,
        }
    }
}

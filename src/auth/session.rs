//! The authenticated session: identity token, refresh credential, expiry.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Seconds of slack applied to expiry checks so a token is not handed to a
/// remote call moments before it lapses.
pub const EXPIRY_BUFFER_SECS: i64 = 60;

/// An authenticated identity plus the credential material needed to prove
/// and refresh it. Created by a successful sign-in or a silent restoration;
/// held exclusively by the session manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Short-lived identity token presented as a bearer credential.
    pub id_token: String,
    /// Long-lived secret exchanged for fresh identity tokens.
    pub refresh_token: String,
    /// When the identity token lapses.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id_token: String, refresh_token: String, expires_in_secs: u64) -> Self {
        Self {
            id_token,
            refresh_token,
            expires_at: Utc::now() + Duration::seconds(expires_in_secs as i64),
        }
    }

    /// Freshness check: valid if the identity token has not lapsed
    /// (with buffer). Never trusts a cached flag.
    pub fn is_valid(&self) -> bool {
        !is_expired(self.expires_at, EXPIRY_BUFFER_SECS)
    }

    /// Email claim from the identity token, for display only. The token is
    /// never validated locally; authorization stays with the remote APIs.
    pub fn email(&self) -> Option<String> {
        jwt_claim(&self.id_token, "email")
    }
}

/// Check whether an expiry instant has passed (with buffer seconds).
pub fn is_expired(expires_at: DateTime<Utc>, buffer_secs: i64) -> bool {
    expires_at < Utc::now() + Duration::seconds(buffer_secs)
}

/// Best-effort string claim lookup in an unverified JWT payload.
fn jwt_claim(token: &str, claim: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let json: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    json.get(claim)
        .and_then(|v| v.as_str())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with_payload(payload: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn fresh_session_is_valid() {
        let session = Session::new("tok".into(), "refresh".into(), 3600);
        assert!(session.is_valid());
    }

    #[test]
    fn session_within_buffer_is_stale() {
        // Expires in 10s, buffer is 60s
        let session = Session::new("tok".into(), "refresh".into(), 10);
        assert!(!session.is_valid());
    }

    #[test]
    fn expired_instant_detected() {
        let past = Utc::now() - Duration::seconds(5);
        assert!(is_expired(past, 0));
        let future = Utc::now() + Duration::seconds(300);
        assert!(!is_expired(future, 0));
    }

    #[test]
    fn email_claim_decoded_from_token() {
        let token = token_with_payload(r#"{"email":"engineer@example.test","sub":"abc"}"#);
        let session = Session::new(token, "refresh".into(), 3600);
        assert_eq!(session.email().as_deref(), Some("engineer@example.test"));
    }

    #[test]
    fn malformed_token_yields_no_claim() {
        let session = Session::new("not-a-jwt".into(), "refresh".into(), 3600);
        assert_eq!(session.email(), None);
    }
}

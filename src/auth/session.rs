use std::collections::HashMap;
use std::sync::Mutex;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

/// Sessions outlive a working day but not a forgotten-open laptop weekend.
pub const DEFAULT_SESSION_TTL: Duration = Duration::hours(12);

const EMBEDDED_EMAIL: &str = "admin@contadesk.local";
// sha256 of the installation-default password; meant to be changed on site.
const EMBEDDED_PASSWORD_SHA256: &str =
    "226f38ca25921c750da718d98d58d03207fd2791794cc5b033625750c435e4a7";

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let out = hasher.finalize();
    out.iter().map(|b| format!("{b:02x}")).collect()
}

fn new_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

struct Session {
    subject: String,
    expires_at: OffsetDateTime,
}

/// In-memory session table for the single operator account. Credentials are
/// compared as SHA-256 digests; tokens are opaque 32-byte random values.
pub struct SessionService {
    email: String,
    password_sha256: String,
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl Default for SessionService {
    fn default() -> Self {
        Self::new(EMBEDDED_EMAIL, EMBEDDED_PASSWORD_SHA256, DEFAULT_SESSION_TTL)
    }
}

impl SessionService {
    pub fn new(email: &str, password_sha256: &str, ttl: Duration) -> Self {
        Self {
            email: email.to_lowercase(),
            password_sha256: password_sha256.to_lowercase(),
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_password(email: &str, password: &str, ttl: Duration) -> Self {
        Self::new(email, &sha256_hex(password), ttl)
    }

    /// Checks the pair and mints a session token. The failure message never
    /// says which half was wrong.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<String, String> {
        let email_ok = email.trim().to_lowercase() == self.email;
        let password_ok = sha256_hex(password) == self.password_sha256;
        if !(email_ok && password_ok) {
            return Err("credenciais inválidas".to_string());
        }

        let token = new_token();
        let session = Session {
            subject: self.email.clone(),
            expires_at: OffsetDateTime::now_utc() + self.ttl,
        };
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| "session table poisoned".to_string())?;
        sessions.insert(token.clone(), session);
        Ok(token)
    }

    /// Resolves a token to its subject. Expired sessions are evicted on the
    /// lookup that finds them.
    pub fn validate(&self, token: &str) -> Result<String, String> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| "session table poisoned".to_string())?;
        match sessions.get(token) {
            None => Err("sessão desconhecida".to_string()),
            Some(s) if s.expires_at <= OffsetDateTime::now_utc() => {
                sessions.remove(token);
                Err("sessão expirada".to_string())
            }
            Some(s) => Ok(s.subject.clone()),
        }
    }

    /// Idempotent; returns whether the token was actually present.
    pub fn logout(&self, token: &str) -> Result<bool, String> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| "session table poisoned".to_string())?;
        Ok(sessions.remove(token).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> SessionService {
        SessionService::with_password("dona@example.com", "s3creta!", DEFAULT_SESSION_TTL)
    }

    #[test]
    fn authenticate_accepts_known_pair() {
        let svc = service();
        let token = svc.authenticate("dona@example.com", "s3creta!").unwrap();
        assert_eq!(svc.validate(&token).unwrap(), "dona@example.com");
    }

    #[test]
    fn email_comparison_is_case_insensitive() {
        let svc = service();
        assert!(svc.authenticate("Dona@Example.COM", "s3creta!").is_ok());
    }

    #[test]
    fn wrong_password_is_rejected_without_detail() {
        let svc = service();
        let err = svc.authenticate("dona@example.com", "nope").unwrap_err();
        assert_eq!(err, "credenciais inválidas");
        let err = svc.authenticate("other@example.com", "s3creta!").unwrap_err();
        assert_eq!(err, "credenciais inválidas");
    }

    #[test]
    fn tokens_are_unique_and_opaque() {
        let svc = service();
        let a = svc.authenticate("dona@example.com", "s3creta!").unwrap();
        let b = svc.authenticate("dona@example.com", "s3creta!").unwrap();
        assert_ne!(a, b);
        assert!(a.len() >= 40);
        assert!(!a.contains("dona"));
    }

    #[test]
    fn expired_session_is_evicted() {
        let svc = SessionService::with_password("dona@example.com", "s3creta!", Duration::ZERO);
        let token = svc.authenticate("dona@example.com", "s3creta!").unwrap();
        assert_eq!(svc.validate(&token).unwrap_err(), "sessão expirada");
        // second lookup no longer finds the entry at all
        assert_eq!(svc.validate(&token).unwrap_err(), "sessão desconhecida");
    }

    #[test]
    fn logout_is_idempotent() {
        let svc = service();
        let token = svc.authenticate("dona@example.com", "s3creta!").unwrap();
        assert!(svc.logout(&token).unwrap());
        assert!(!svc.logout(&token).unwrap());
        assert!(svc.validate(&token).is_err());
    }

    #[test]
    fn default_service_uses_embedded_account() {
        let svc = SessionService::default();
        assert!(svc.authenticate("admin@contadesk.local", "mudar-me-123").is_ok());
        assert!(svc.authenticate("admin@contadesk.local", "123456").is_err());
    }
}

//! Basic authentication for the client endpoint
//!
//! Credentials come from the inline `auth` setting and the `auth_path`
//! file. Both hold `user:pass` pairs separated by commas (the file may
//! also spread them over several lines).

use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use subtle::{Choice, ConstantTimeEq};

use crate::config::ServerConfig;
use crate::error::EndpointError;

/// A `user:pass` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    pub password: String,
}

impl Credential {
    /// Split at the first colon; entries without one are rejected
    pub fn parse(entry: &str) -> Option<Self> {
        let (user, password) = entry.split_once(':')?;
        Some(Self {
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    /// Constant-time comparison of both fields
    fn matches(&self, other: &Credential) -> Choice {
        self.user.as_bytes().ct_eq(other.user.as_bytes())
            & self.password.as_bytes().ct_eq(other.password.as_bytes())
    }
}

/// Deduplicated list of accepted credentials
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    entries: Vec<Credential>,
}

impl Credentials {
    /// Parse an inline credential string
    pub fn parse_inline(raw: &str) -> Self {
        let cleaned = raw.trim().trim_matches('"').replace(['\n', '\r'], "");
        let mut credentials = Self::default();
        credentials.extend_entries(cleaned.split(','));
        credentials
    }

    /// Collect credentials from the inline string and the auth file
    pub fn from_config(config: &ServerConfig) -> Result<Self, EndpointError> {
        let mut credentials = config
            .auth
            .as_deref()
            .map(Self::parse_inline)
            .unwrap_or_default();

        if let Some(path) = &config.auth_path {
            credentials.extend_from_file(path)?;
        }
        Ok(credentials)
    }

    fn extend_from_file(&mut self, path: &Path) -> Result<(), EndpointError> {
        let content = std::fs::read_to_string(path).map_err(|source| EndpointError::AuthFile {
            path: path.to_path_buf(),
            source,
        })?;
        self.extend_entries(content.lines().flat_map(|line| line.split(',')));
        Ok(())
    }

    fn extend_entries<'a>(&mut self, entries: impl Iterator<Item = &'a str>) {
        for entry in entries.map(str::trim).filter(|e| !e.is_empty()) {
            match Credential::parse(entry) {
                Some(credential) => {
                    if !self.entries.contains(&credential) {
                        self.entries.push(credential);
                    }
                }
                None => tracing::warn!("Ignoring credential without a ':' separator"),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.entries.iter()
    }

    /// Check an `Authorization` header value
    pub fn verify_header(&self, value: &HeaderValue) -> bool {
        let Some(encoded) = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Basic "))
        else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(text) = String::from_utf8(decoded) else {
            return false;
        };
        let Some(candidate) = Credential::parse(&text) else {
            return false;
        };
        // Every entry is compared, a match does not end the scan
        self.entries
            .iter()
            .fold(Choice::from(0), |found, entry| found | entry.matches(&candidate))
            .into()
    }
}

/// Middleware rejecting requests without valid basic-auth credentials
pub async fn require_basic_auth(
    State(credentials): State<Arc<Credentials>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|value| credentials.verify_header(value))
        .unwrap_or(false);

    if authorized {
        return next.run(request).await;
    }

    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"llmhost\"")],
        "Unauthorized",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inline_strips_and_dedups() {
        let credentials = Credentials::parse_inline("\"alice:pw1, bob:pw2,\nalice:pw1,,\"");
        let users: Vec<_> = credentials.iter().map(|c| c.user.as_str()).collect();
        assert_eq!(users, vec!["alice", "bob"]);
    }

    #[test]
    fn test_password_may_contain_colons() {
        let credential = Credential::parse("carol:a:b").unwrap();
        assert_eq!(credential.user, "carol");
        assert_eq!(credential.password, "a:b");
        assert!(Credential::parse("nocolon").is_none());
    }

    #[test]
    fn test_from_config_merges_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.txt");
        std::fs::write(&path, "bob:pw2\ndave:pw4, erin:pw5\n").unwrap();

        let config = ServerConfig {
            auth: Some("alice:pw1,bob:pw2".to_string()),
            auth_path: Some(path),
            ..Default::default()
        };
        let credentials = Credentials::from_config(&config).unwrap();
        assert_eq!(credentials.len(), 4);
    }

    #[test]
    fn test_missing_auth_file_is_an_error() {
        let config = ServerConfig {
            auth_path: Some("/nonexistent/auth.txt".into()),
            ..Default::default()
        };
        assert!(matches!(
            Credentials::from_config(&config),
            Err(EndpointError::AuthFile { .. })
        ));
    }

    #[test]
    fn test_verify_header() {
        let credentials = Credentials::parse_inline("alice:pw1");
        let good = HeaderValue::from_str(&format!("Basic {}", STANDARD.encode("alice:pw1"))).unwrap();
        let bad = HeaderValue::from_str(&format!("Basic {}", STANDARD.encode("alice:nope"))).unwrap();
        assert!(credentials.verify_header(&good));
        assert!(!credentials.verify_header(&bad));
        assert!(!credentials.verify_header(&HeaderValue::from_static("Bearer xyz")));
    }

    #[test]
    fn test_any_listed_credential_verifies() {
        let credentials = Credentials::parse_inline("alice:pw1,bob:pw2,carol:a:b");
        let header = |pair: &str| {
            HeaderValue::from_str(&format!("Basic {}", STANDARD.encode(pair))).unwrap()
        };
        assert!(credentials.verify_header(&header("bob:pw2")));
        assert!(credentials.verify_header(&header("carol:a:b")));
        assert!(!credentials.verify_header(&header("bob:pw1")));
        assert!(!credentials.verify_header(&header("bob:pw2x")));
        assert!(!credentials.verify_header(&header("bo:pw2")));
        assert!(!credentials.verify_header(&header("nocolon")));
    }
}

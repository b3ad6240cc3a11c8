//! Cookies from the host's web-view session
//!
//! Plugins that need a logged-in session read these cookies and forward the
//! values they care about in their own request headers.

use std::path::Path;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{ErrorContext, Result};

/// One cookie, with the field names plugins see
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CookieRecord {
    pub name: String,
    pub path: String,
    pub domain: String,
    pub value: String,
    /// Expiry as reported by the web view, empty for session cookies
    #[serde(default)]
    pub expires: String,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

impl CookieRecord {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: "/".to_string(),
            domain: domain.into(),
            value: value.into(),
            expires: String::new(),
            http_only: false,
            secure: false,
        }
    }

    /// Parsed expiry; RFC 3339 and RFC 2822 are understood
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.expires.trim();
        if raw.is_empty() {
            return None;
        }
        DateTime::parse_from_rfc3339(raw)
            .or_else(|_| DateTime::parse_from_rfc2822(raw))
            .ok()
            .map(|at| at.with_timezone(&Utc))
    }

    /// Session cookies and unparseable expiries never count as expired
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map_or(false, |at| at <= now)
    }
}

/// Where `getCookies` reads from
#[async_trait]
pub trait CookieSource: Send + Sync {
    async fn cookies(&self) -> Result<Vec<CookieRecord>>;
}

/// In-memory cookie store, filled by the host's web-view layer
#[derive(Default)]
pub struct CookieJar {
    cookies: RwLock<Vec<CookieRecord>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of cookie records exported from the web view
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .storage_context(format!("Failed to read cookie file {}", path.display()))?;
        let cookies: Vec<CookieRecord> = serde_json::from_str(&content)?;
        Ok(Self {
            cookies: RwLock::new(cookies),
        })
    }

    /// Insert a cookie, replacing one with the same name, domain and path
    pub fn insert(&self, cookie: CookieRecord) {
        let mut cookies = self.cookies.write().unwrap_or_else(PoisonError::into_inner);
        cookies.retain(|existing| {
            !(existing.name == cookie.name
                && existing.domain == cookie.domain
                && existing.path == cookie.path)
        });
        cookies.push(cookie);
    }

    /// Replace the whole jar, e.g. after the user logs in again
    pub fn replace_all(&self, cookies: Vec<CookieRecord>) {
        *self.cookies.write().unwrap_or_else(PoisonError::into_inner) = cookies;
    }

    pub fn clear(&self) {
        self.cookies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl CookieSource for CookieJar {
    async fn cookies(&self) -> Result<Vec<CookieRecord>> {
        Ok(self
            .cookies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

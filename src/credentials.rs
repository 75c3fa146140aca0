//! Upstream credential classification, header derivation and hot swapping.
//!
//! A credential is either a Claude subscription (OAuth) token or a raw API key,
//! told apart by prefix. Subscription tokens authenticate with a bearer header and
//! must identify themselves as the Claude CLI; raw keys only need `x-api-key`.
//!
//! The current [`CredentialSet`] lives behind [`CredentialStore`] as an immutable
//! `Arc` snapshot. Refreshing builds a complete new set and swaps the `Arc`, so a
//! call that already holds the old snapshot keeps a consistent view.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use thiserror::Error;

const SUBSCRIPTION_PREFIX: &str = "sk-ant-oat";

const OAUTH_BETA_FEATURES: &str = "claude-code-20250219,oauth-2025-04-20,interleaved-thinking-2025-05-14,fine-grained-tool-streaming-2025-05-14";
const CLI_USER_AGENT: &str = "claude-cli/2.1.34 (external, cli)";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("no credential found: {0}")]
    NotFound(String),

    #[error("credential in {0} has expired; run `claude` to log in again")]
    Expired(String),

    #[error("credential is not usable: {0}")]
    Invalid(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Claude Pro/Max OAuth token (`sk-ant-oat...`).
    SubscriptionToken,
    RawKey,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubscriptionToken => f.write_str("subscription-token"),
            Self::RawKey => f.write_str("raw-key"),
        }
    }
}

pub fn classify(credential: &str) -> CredentialKind {
    if credential.starts_with(SUBSCRIPTION_PREFIX) {
        CredentialKind::SubscriptionToken
    } else {
        CredentialKind::RawKey
    }
}

/// Authentication headers for `credential`. Subscription tokens additionally carry
/// the beta flags and CLI identification the upstream requires to accept them.
pub fn build_headers(credential: &str, kind: CredentialKind) -> Result<HeaderMap, CredentialError> {
    let value = |v: &str| {
        HeaderValue::from_str(v)
            .map_err(|_| CredentialError::Invalid("contains characters not allowed in a header".into()))
    };

    let mut headers = HeaderMap::new();
    match kind {
        CredentialKind::SubscriptionToken => {
            let mut bearer = value(&format!("Bearer {credential}"))?;
            bearer.set_sensitive(true);
            headers.insert(AUTHORIZATION, bearer);
            headers.insert(
                HeaderName::from_static("anthropic-beta"),
                HeaderValue::from_static(OAUTH_BETA_FEATURES),
            );
            headers.insert(
                HeaderName::from_static("anthropic-dangerous-direct-browser-access"),
                HeaderValue::from_static("true"),
            );
            headers.insert(USER_AGENT, HeaderValue::from_static(CLI_USER_AGENT));
            headers.insert(HeaderName::from_static("x-app"), HeaderValue::from_static("cli"));
        }
        CredentialKind::RawKey => {
            let mut key = value(credential)?;
            key.set_sensitive(true);
            headers.insert(HeaderName::from_static("x-api-key"), key);
        }
    }
    Ok(headers)
}

/// A credential together with everything derived from it.
#[derive(Clone)]
pub struct CredentialSet {
    credential: String,
    kind: CredentialKind,
    headers: HeaderMap,
}

impl CredentialSet {
    pub fn new(credential: impl Into<String>) -> Result<Self, CredentialError> {
        let credential = credential.into().trim().to_string();
        if credential.is_empty() {
            return Err(CredentialError::Invalid("empty credential".into()));
        }
        let kind = classify(&credential);
        let headers = build_headers(&credential, kind)?;
        Ok(Self {
            credential,
            kind,
            headers,
        })
    }

    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.credential.chars().take(12).collect();
        f.debug_struct("CredentialSet")
            .field("credential", &format_args!("{visible}..."))
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Where the upstream credential comes from. Re-read on every refresh.
pub trait CredentialSource: Send + Sync {
    fn load(&self) -> Result<String, CredentialError>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// A credential written directly into the config file.
pub struct StaticCredential(pub String);

impl CredentialSource for StaticCredential {
    fn load(&self) -> Result<String, CredentialError> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "config file".to_string()
    }
}

pub struct EnvCredential {
    pub var: String,
}

impl CredentialSource for EnvCredential {
    fn load(&self) -> Result<String, CredentialError> {
        std::env::var(&self.var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| CredentialError::NotFound(format!("environment variable {} is not set", self.var)))
    }

    fn describe(&self) -> String {
        format!("${}", self.var)
    }
}

/// The OAuth login Claude Code keeps in `~/.claude/.credentials.json`.
pub struct ClaudeCredentialsFile {
    pub path: PathBuf,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsFile {
    claude_ai_oauth: Option<OAuthEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthEntry {
    access_token: Option<String>,
    /// Milliseconds since the unix epoch.
    expires_at: Option<i64>,
}

impl ClaudeCredentialsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> Option<PathBuf> {
        std::env::var("HOME")
            .ok()
            .map(|home| Path::new(&home).join(".claude").join(".credentials.json"))
    }
}

impl CredentialSource for ClaudeCredentialsFile {
    fn load(&self) -> Result<String, CredentialError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CredentialError::NotFound(format!("{} does not exist", self.path.display()))
            } else {
                CredentialError::Io {
                    path: self.path.clone(),
                    source: e,
                }
            }
        })?;

        let parsed: CredentialsFile = serde_json::from_str(&raw)
            .map_err(|e| CredentialError::Invalid(format!("{}: {e}", self.path.display())))?;

        let entry = parsed
            .claude_ai_oauth
            .ok_or_else(|| CredentialError::NotFound(format!("no claudeAiOauth entry in {}", self.path.display())))?;
        let token = entry
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CredentialError::NotFound(format!("no access token in {}", self.path.display())))?;

        if let Some(expires_at) = entry.expires_at {
            if expires_at < chrono::Utc::now().timestamp_millis() {
                return Err(CredentialError::Expired(self.path.display().to_string()));
            }
        }

        Ok(token)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Tries each source in order; the first that yields a credential wins.
#[derive(Default)]
pub struct SourceChain(Vec<Box<dyn CredentialSource>>);

impl SourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, source: impl CredentialSource + 'static) -> Self {
        self.0.push(Box::new(source));
        self
    }
}

impl CredentialSource for SourceChain {
    fn load(&self) -> Result<String, CredentialError> {
        let mut last = CredentialError::NotFound("no credential sources configured".into());
        for source in &self.0 {
            match source.load() {
                Ok(credential) => return Ok(credential),
                Err(e) => {
                    tracing::debug!(source = %source.describe(), error = %e, "Credential source unavailable");
                    last = e;
                }
            }
        }
        Err(last)
    }

    fn describe(&self) -> String {
        self.0.iter().map(|s| s.describe()).collect::<Vec<_>>().join(" -> ")
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Shared, hot-swappable credential snapshot.
#[derive(Clone)]
pub struct CredentialStore {
    current: Arc<RwLock<Option<Arc<CredentialSet>>>>,
    source: Arc<dyn CredentialSource>,
}

impl CredentialStore {
    /// A store with nothing loaded yet.
    pub fn empty(source: impl CredentialSource + 'static) -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            source: Arc::new(source),
        }
    }

    /// Load the initial credential. A failure leaves the store unconfigured
    /// rather than aborting startup.
    pub fn load(source: impl CredentialSource + 'static) -> Self {
        let store = Self::empty(source);
        match store.refresh() {
            Ok(set) => tracing::info!(kind = %set.kind(), source = %store.source.describe(), "Loaded upstream credential"),
            Err(e) => tracing::warn!(error = %e, "No usable upstream credential; chat completions will return 503"),
        }
        store
    }

    pub fn current(&self) -> Option<Arc<CredentialSet>> {
        self.current
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn is_configured(&self) -> bool {
        self.current().is_some()
    }

    /// Re-read the source and swap in a freshly built set. On failure the
    /// previous set stays in place.
    pub fn refresh(&self) -> Result<Arc<CredentialSet>, CredentialError> {
        let set = Arc::new(CredentialSet::new(self.source.load()?)?);
        *self
            .current
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::clone(&set));
        Ok(set)
    }

    pub fn source_description(&self) -> String {
        self.source.describe()
    }
}

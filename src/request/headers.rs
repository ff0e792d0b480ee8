//! Session-consistent synthetic client headers

use std::sync::Arc;

use dashmap::DashMap;
use http::header::{
    HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CONNECTION, COOKIE, USER_AGENT,
};
use http::HeaderMap;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::error::{Result, RotorError};
use crate::models::{AuthToken, Session};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/121.0.0.0",
];

const LOCALES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.8",
    "es-ES,es;q=0.9",
    "fr-FR,fr;q=0.9",
    "de-DE,de;q=0.9",
];

const DEFAULT_ACCEPT: &str = "application/json, text/plain, */*";

/// Fetch metadata of a cross-site XHR, identical for every session
const FETCH_METADATA: &[(&str, &str)] = &[
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "same-site"),
];

/// Derives one synthetic client identity per session id
///
/// The first call for a session id picks a user-agent and locale at random;
/// every later call with the same id sees exactly the same pair.
pub struct SessionHeaderFactory {
    sessions: DashMap<String, Arc<Session>>,
    user_agents: Vec<String>,
    locales: Vec<String>,
}

impl SessionHeaderFactory {
    pub fn new() -> Self {
        Self::with_pools(
            USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            LOCALES.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Factory drawing from custom user-agent and locale pools
    ///
    /// Empty pools fall back to the built-in lists.
    pub fn with_pools(user_agents: Vec<String>, locales: Vec<String>) -> Self {
        let user_agents = if user_agents.is_empty() {
            USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            user_agents
        };
        let locales = if locales.is_empty() {
            LOCALES.iter().map(|s| s.to_string()).collect()
        } else {
            locales
        };

        Self {
            sessions: DashMap::new(),
            user_agents,
            locales,
        }
    }

    /// Session bound to `session_id`, created on first use
    pub fn session(&self, session_id: &str) -> Arc<Session> {
        // The entry guard holds the shard lock, so two callers racing on a
        // fresh id cannot both generate a fingerprint.
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id, "Creating session fingerprint");
                Arc::new(self.generate(session_id))
            })
            .value()
            .clone()
    }

    /// Session under a freshly generated id
    pub fn new_session(&self) -> Arc<Session> {
        self.session(&Session::new_id())
    }

    /// Header set for one request of `session_id`
    pub fn headers_for(&self, session_id: &str, auth: Option<&AuthToken>) -> Result<HeaderMap> {
        let session = self.session(session_id);

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value("user-agent", &session.user_agent)?);
        headers.insert(ACCEPT_LANGUAGE, header_value("accept-language", &session.locale)?);
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        for &(name, value) in FETCH_METADATA {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }

        if let Some(auth) = auth {
            headers.insert(
                AUTHORIZATION,
                header_value("authorization", &format!("Bearer {}", auth.token))?,
            );
            headers.insert(
                COOKIE,
                header_value("cookie", &format!("auth_token={}", auth.token))?,
            );

            if let Some((name, value)) = &auth.extra {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| RotorError::InvalidHeader { name: "extra" })?;
                headers.insert(name, header_value("extra", value)?);
            }
        }

        Ok(headers)
    }

    /// Number of sessions created so far
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn generate(&self, session_id: &str) -> Session {
        let mut rng = rand::thread_rng();
        Session {
            id: session_id.to_string(),
            user_agent: self
                .user_agents
                .choose(&mut rng)
                .cloned()
                .unwrap_or_default(),
            locale: self.locales.choose(&mut rng).cloned().unwrap_or_default(),
            created_at: chrono::Utc::now(),
        }
    }
}

impl Default for SessionHeaderFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| RotorError::InvalidHeader { name })
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Synthetic client identity shared by every request of one logical session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_agent: String,
    pub locale: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Fresh random session id
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Credential presented to the target API
///
/// Sent both as a bearer token and as the `auth_token` cookie.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub token: String,
    /// Secondary per-operation token some endpoints require next to the bearer
    pub extra: Option<(String, String)>,
}

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            extra: None,
        }
    }

    /// Attach an additional header (name, value) sent alongside the bearer token
    pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra = Some((name.into(), value.into()));
        self
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"***")
            .field("extra", &self.extra.as_ref().map(|(name, _)| name))
            .finish()
    }
}

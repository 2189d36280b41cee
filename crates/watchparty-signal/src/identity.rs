use serde::{Deserialize, Serialize};

/// The local user as known to the identity provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Stable per-user id; doubles as the signal address.
    pub user_id: String,
    pub display_name: String,
    #[serde(skip)]
    pub access_token: Option<String>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            access_token: None,
        }
    }

    /// Attach an auth token from the identity provider.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Name shown to other participants; falls back to "Guest".
    pub fn shown_name(&self) -> &str {
        let name = self.display_name.trim();
        if name.is_empty() {
            "Guest"
        } else {
            name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let id = Identity::new("u1", "Ada").with_access_token("secret-jwt");
        let debug = format!("{id:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret-jwt"));
    }

    #[test]
    fn blank_name_falls_back_to_guest() {
        assert_eq!(Identity::new("u1", "  ").shown_name(), "Guest");
        assert_eq!(Identity::new("u1", "Ada").shown_name(), "Ada");
    }

    #[test]
    fn token_is_not_serialized() {
        let id = Identity::new("u1", "Ada").with_access_token("secret-jwt");
        let json = serde_json::to_string(&id).unwrap();
        assert!(!json.contains("secret-jwt"));
    }
}

use serde::Serialize;

/// Who is acting. Guests are a full identity scoped to a fixed id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Identity {
    User(String),
    Guest,
}

impl Identity {
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(id) if !id.is_empty() => Identity::User(id.to_string()),
            _ => Identity::Guest,
        }
    }
}

/// Resolves identities to the user id every store call is scoped by.
#[derive(Debug, Clone)]
pub struct AuthProvider {
    guest_user_id: String,
}

impl AuthProvider {
    pub fn new(guest_user_id: impl Into<String>) -> Self {
        Self {
            guest_user_id: guest_user_id.into(),
        }
    }

    pub fn current_user_id(&self, identity: &Identity) -> String {
        match identity {
            Identity::User(id) => id.clone(),
            Identity::Guest => self.guest_user_id.clone(),
        }
    }

    /// Builds the context handed to a session when its view mounts.
    pub fn session_context(&self, identity: Identity, workout_id: &str) -> SessionContext {
        SessionContext {
            user_id: self.current_user_id(&identity),
            identity,
            workout_id: workout_id.to_string(),
        }
    }
}

/// Explicit per-session context. Lives exactly as long as the session it was
/// created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionContext {
    pub identity: Identity,
    pub user_id: String,
    pub workout_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_header_is_guest() {
        assert_eq!(Identity::from_header(None), Identity::Guest);
        assert_eq!(Identity::from_header(Some("  ")), Identity::Guest);
        assert_eq!(
            Identity::from_header(Some("user-7")),
            Identity::User("user-7".to_string())
        );
    }

    #[test]
    fn guest_resolves_to_fixed_id() {
        let auth = AuthProvider::new("guest");
        assert_eq!(auth.current_user_id(&Identity::Guest), "guest");
        let ctx = auth.session_context(Identity::Guest, "w1");
        assert_eq!(ctx.user_id, "guest");
        assert_eq!(ctx.workout_id, "w1");
        assert_eq!(ctx.identity, Identity::Guest);
    }
}

//! Identity state threaded through workflow steps

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::client::Credential;

/// A signed-in test user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub password: String,
    pub access_token: String,
}

/// Which credential the next step runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    Anonymous,
    Authenticated,
    ServiceRole,
}

/// Mutable state of one workflow run.
///
/// Owned by the caller and passed `&mut` into every step. Service role and
/// a current identity are mutually exclusive.
#[derive(Debug, Clone, Default)]
pub struct Session {
    current: Option<Identity>,
    service_role_active: bool,
    users: HashMap<String, Identity>,
    scratch: Map<String, Value>,
    users_purged: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back to anonymous with empty caches. The first-cleanup marker
    /// survives: it is scoped to the engine's lifetime, not to an example.
    pub fn reset(&mut self) {
        self.current = None;
        self.service_role_active = false;
        self.users.clear();
        self.scratch.clear();
    }

    pub fn state(&self) -> IdentityState {
        if self.service_role_active {
            IdentityState::ServiceRole
        } else if self.current.is_some() {
            IdentityState::Authenticated
        } else {
            IdentityState::Anonymous
        }
    }

    pub fn current_identity(&self) -> Option<&Identity> {
        self.current.as_ref()
    }

    pub fn is_service_role(&self) -> bool {
        self.service_role_active
    }

    /// Credential matching the current state
    pub fn credential(&self) -> Credential {
        match (&self.current, self.service_role_active) {
            (_, true) => Credential::ServiceRole,
            (Some(identity), false) => Credential::User {
                access_token: identity.access_token.clone(),
            },
            (None, false) => Credential::Anon,
        }
    }

    /// Make `identity` current and drop the service role
    pub fn authenticate(&mut self, identity: Identity) {
        self.remember(identity.clone());
        self.current = Some(identity);
        self.service_role_active = false;
    }

    pub fn sign_out(&mut self) {
        self.current = None;
        self.service_role_active = false;
    }

    pub fn use_service_role(&mut self) {
        self.current = None;
        self.service_role_active = true;
    }

    pub fn remember(&mut self, identity: Identity) {
        self.users.insert(identity.email.clone(), identity);
    }

    pub fn cached_user(&self, email: &str) -> Option<&Identity> {
        self.users.get(email)
    }

    pub fn forget_users(&mut self) {
        self.users.clear();
    }

    /// Whether a cleanup has already deleted the test users
    pub fn users_purged(&self) -> bool {
        self.users_purged
    }

    pub fn mark_users_purged(&mut self) {
        self.users_purged = true;
    }

    /// Free-form values steps may stash for later steps
    pub fn scratch(&self) -> &Map<String, Value> {
        &self.scratch
    }

    pub fn scratch_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.scratch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity {
            id: "u-alice".into(),
            email: "alice@rlstest.com".into(),
            password: "password123".into(),
            access_token: "tok-alice".into(),
        }
    }

    #[test]
    fn states_are_exclusive() {
        let mut session = Session::new();
        assert_eq!(session.state(), IdentityState::Anonymous);
        assert_eq!(session.credential(), Credential::Anon);

        session.authenticate(alice());
        assert_eq!(session.state(), IdentityState::Authenticated);
        assert_eq!(
            session.credential(),
            Credential::User {
                access_token: "tok-alice".into()
            }
        );

        session.use_service_role();
        assert_eq!(session.state(), IdentityState::ServiceRole);
        assert!(session.current_identity().is_none());

        session.authenticate(alice());
        assert!(!session.is_service_role());

        session.sign_out();
        assert_eq!(session.state(), IdentityState::Anonymous);
        assert!(session.cached_user("alice@rlstest.com").is_some());
    }

    #[test]
    fn reset_keeps_purge_marker() {
        let mut session = Session::new();
        session.authenticate(alice());
        session.mark_users_purged();
        session
            .scratch_mut()
            .insert("post_id".into(), Value::from(7));

        session.reset();
        assert_eq!(session.state(), IdentityState::Anonymous);
        assert!(session.cached_user("alice@rlstest.com").is_none());
        assert!(session.scratch().is_empty());
        assert!(session.users_purged());
    }
}

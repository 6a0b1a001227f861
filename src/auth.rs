//! Credential verification collaborator.

use log::{debug, info};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Verifies login attempts and registers new users.
///
/// `is_login == false` means register: succeed only when the name is free,
/// and persist the new credential.
pub trait AuthStore: Send + Sync {
    fn verify(&self, username: &str, password: &str, is_login: bool) -> bool;
}

/// An [`AuthStore`] keeping credentials in process memory
#[derive(Debug, Default)]
pub struct InMemoryAuthStore {
    users: RwLock<HashMap<String, String>>,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing users
    pub fn with_users<I, U, P>(users: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        let users = users
            .into_iter()
            .map(|(u, p)| (u.into(), p.into()))
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

impl AuthStore for InMemoryAuthStore {
    fn verify(&self, username: &str, password: &str, is_login: bool) -> bool {
        if username.is_empty() || password.is_empty() {
            return false;
        }
        info!("verify user {} ({})", username, if is_login { "login" } else { "register" });

        if is_login {
            let ok = self
                .users
                .read()
                .get(username)
                .is_some_and(|stored| stored == password);
            if !ok {
                debug!("password mismatch for {}", username);
            }
            return ok;
        }

        let mut users = self.users.write();
        if users.contains_key(username) {
            debug!("user {} already registered", username);
            return false;
        }
        users.insert(username.to_string(), password.to_string());
        true
    }
}

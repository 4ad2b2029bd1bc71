//! User accounts
//!
//! Read once at startup from `users.json`:
//!
//! ```json
//! { "users": [ { "id": 1, "email": "a@example.com", "password": "$2b$10$..." } ] }
//! ```
//!
//! Passwords are bcrypt hashes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub email: String,
    #[serde(rename = "password")]
    pub password_hash: String,
}

#[derive(Deserialize)]
struct UsersFile {
    users: Vec<User>,
}

impl User {
    /// New account with `password` hashed at `cost`
    pub fn with_password(
        id: u64,
        email: impl Into<String>,
        password: &str,
        cost: u32,
    ) -> Result<Self, bcrypt::BcryptError> {
        Ok(Self {
            id,
            email: email.into(),
            password_hash: bcrypt::hash(password, cost)?,
        })
    }
}

/// Render a `users.json` document holding `users`
pub fn users_json(users: &[User]) -> serde_json::Result<String> {
    #[derive(Serialize)]
    struct Document<'a> {
        users: &'a [User],
    }

    serde_json::to_string_pretty(&Document { users })
}

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("Failed to read users file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse users file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read-only list of accounts allowed to log in
#[derive(Debug, Clone, Default)]
pub struct UserStore {
    users: Vec<User>,
}

impl UserStore {
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }

    pub fn from_json(json: &str) -> Result<Self, UserStoreError> {
        let file: UsersFile = serde_json::from_str(json)?;
        Ok(Self::new(file.users))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, UserStoreError> {
        let store = Self::from_json(&std::fs::read_to_string(path.as_ref())?)?;
        info!("Loaded {} users from {}", store.len(), path.as_ref().display());
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn find_by_email(&self, email: &str) -> Option<&User> {
        self.users.iter().find(|u| u.email == email)
    }

    /// Check credentials. Blocking: bcrypt is deliberately slow, so call
    /// this from `spawn_blocking`.
    pub fn verify(&self, email: &str, password: &str) -> Option<User> {
        let Some(user) = self.find_by_email(email) else {
            debug!("User not found: {}", email);
            return None;
        };

        match bcrypt::verify(password, &user.password_hash) {
            Ok(true) => Some(user.clone()),
            Ok(false) => {
                debug!("Invalid password for: {}", email);
                None
            }
            Err(e) => {
                debug!("Unusable password hash for {}: {}", email, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UserStore {
        let hash = bcrypt::hash("hunter22", 4).unwrap();
        UserStore::new(vec![User {
            id: 7,
            email: "ana@example.com".into(),
            password_hash: hash,
        }])
    }

    #[test]
    fn test_parse_users_file() {
        let store = UserStore::from_json(
            r#"{"users": [{"id": 1, "email": "a@example.com", "password": "$2b$10$abc"}]}"#,
        )
        .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.find_by_email("a@example.com").unwrap().id, 1);
        assert!(store.find_by_email("b@example.com").is_none());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(UserStore::from_json("{}"), Err(UserStoreError::Parse(_))));
        assert!(matches!(
            UserStore::load("/nonexistent/users.json"),
            Err(UserStoreError::Io(_))
        ));
    }

    #[test]
    fn test_verify() {
        let store = store();

        assert_eq!(store.verify("ana@example.com", "hunter22").unwrap().id, 7);
        assert!(store.verify("ana@example.com", "wrong").is_none());
        assert!(store.verify("bob@example.com", "hunter22").is_none());
    }

    #[test]
    fn test_new_entry_loads_and_verifies() {
        let user = User::with_password(2, "demo@vpn.com", "password123", 4).unwrap();
        assert!(user.password_hash.starts_with("$2"));
        assert_ne!(user.password_hash, "password123");

        let json = users_json(&[user]).unwrap();
        let store = UserStore::from_json(&json).unwrap();

        assert_eq!(store.verify("demo@vpn.com", "password123").unwrap().id, 2);
        assert!(store.verify("demo@vpn.com", "password124").is_none());
    }

    #[test]
    fn test_invalid_cost_rejected() {
        assert!(User::with_password(1, "a@example.com", "pw", 3).is_err());
    }

    #[test]
    fn test_malformed_hash_rejects() {
        let store = UserStore::new(vec![User {
            id: 1,
            email: "a@example.com".into(),
            password_hash: "not-a-hash".into(),
        }]);

        assert!(store.verify("a@example.com", "anything").is_none());
    }
}

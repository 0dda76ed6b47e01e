//! Client authentication
//!
//! The server supports three methods, chosen per server:
//! * `trust`: every user named in the startup packet is accepted
//! * `password`: cleartext password (only sensible over TLS)
//! * `scram-sha-256`: SASL SCRAM-SHA-256 without channel binding

pub mod scram;

pub use scram::{ScramError, ScramExchange, ScramSecret, ScramServer};

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Authentication method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// No authentication
    #[default]
    Trust,
    /// AuthenticationCleartextPassword
    Password,
    /// AuthenticationSASL with SCRAM-SHA-256
    #[serde(rename = "scram-sha-256")]
    ScramSha256,
}

impl AuthMethod {
    /// Whether the method checks a password
    pub fn requires_password(&self) -> bool {
        !matches!(self, Self::Trust)
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trust => write!(f, "trust"),
            Self::Password => write!(f, "password"),
            Self::ScramSha256 => write!(f, "scram-sha-256"),
        }
    }
}

impl std::str::FromStr for AuthMethod {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "trust" => Ok(Self::Trust),
            "password" => Ok(Self::Password),
            "scram-sha-256" => Ok(Self::ScramSha256),
            _ => Err(Error::Config(format!(
                "invalid auth method '{}': expected trust, password, or scram-sha-256",
                s
            ))),
        }
    }
}

/// Verifiers for the configured users.
///
/// Only SCRAM verifiers are kept; cleartext passwords are checked against
/// them the same way PostgreSQL checks a password against a SCRAM secret.
pub struct UserStore {
    users: HashMap<String, ScramSecret>,
    // Keys the mock verifiers of unknown users
    mock_key: [u8; 32],
}

impl std::fmt::Debug for UserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStore")
            .field("users", &self.users.len())
            .finish_non_exhaustive()
    }
}

impl UserStore {
    /// Derive verifiers for `(user, password)` pairs
    pub fn from_passwords<'a>(users: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let users = users
            .into_iter()
            .map(|(user, password)| (user.clone(), ScramSecret::generate(password)))
            .collect();
        Self {
            users,
            mock_key: rand::random(),
        }
    }

    /// Number of known users
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are configured
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Whether `user` is known
    pub fn contains(&self, user: &str) -> bool {
        self.users.contains_key(user)
    }

    /// Check a cleartext password.
    ///
    /// Unknown users are checked against their mock verifier, so both paths
    /// pay for the same key derivation.
    pub fn verify_password(&self, user: &str, password: &str) -> Result<()> {
        if self.scram_secret(user).verify_password(password) && self.contains(user) {
            Ok(())
        } else {
            Err(password_failed(user))
        }
    }

    /// Verifier to run a SCRAM exchange against.
    ///
    /// Unknown users get a mock verifier with a salt keyed on their name, so
    /// they cannot be told apart from known users with a wrong password.
    pub fn scram_secret(&self, user: &str) -> ScramSecret {
        match self.users.get(user) {
            Some(secret) => secret.clone(),
            None => ScramSecret::mock(&self.mock_key, user),
        }
    }
}

/// Error reported for a failed password check
pub fn password_failed(user: &str) -> Error {
    Error::Authentication(format!(
        "password authentication failed for user \"{}\"",
        user
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UserStore {
        let users: HashMap<String, String> = [("sam".to_string(), "secret".to_string())]
            .into_iter()
            .collect();
        UserStore::from_passwords(&users)
    }

    #[test]
    fn test_auth_method_from_str() {
        assert_eq!("trust".parse::<AuthMethod>().unwrap(), AuthMethod::Trust);
        assert_eq!(
            "password".parse::<AuthMethod>().unwrap(),
            AuthMethod::Password
        );
        assert_eq!(
            "scram-sha-256".parse::<AuthMethod>().unwrap(),
            AuthMethod::ScramSha256
        );
        assert!("md5".parse::<AuthMethod>().is_err());
    }

    #[test]
    fn test_auth_method_display_round_trips() {
        for method in [
            AuthMethod::Trust,
            AuthMethod::Password,
            AuthMethod::ScramSha256,
        ] {
            assert_eq!(method.to_string().parse::<AuthMethod>().unwrap(), method);
        }
    }

    #[test]
    fn test_auth_method_deserialize() {
        let method: AuthMethod = serde_json::from_str("\"scram-sha-256\"").unwrap();
        assert_eq!(method, AuthMethod::ScramSha256);
    }

    #[test]
    fn test_verify_password() {
        let store = store();
        assert!(store.verify_password("sam", "secret").is_ok());
        assert!(matches!(
            store.verify_password("sam", "wrong"),
            Err(Error::Authentication(_))
        ));
        assert!(store.verify_password("nobody", "secret").is_err());
    }

    #[test]
    fn test_unknown_user_gets_stable_mock_secret() {
        let store = store();
        let nobody = store.scram_secret("nobody");
        assert_eq!(nobody, store.scram_secret("nobody"));
        assert_eq!(nobody.iterations(), store.scram_secret("sam").iterations());
        assert_eq!(nobody.salt().len(), store.scram_secret("sam").salt().len());
        assert_ne!(nobody, store.scram_secret("sam"));
    }

    #[test]
    fn test_unknown_users_get_distinct_salts() {
        let store = store();
        let salts: std::collections::HashSet<Vec<u8>> = ["nobody", "someone-else", "root"]
            .into_iter()
            .map(|user| store.scram_secret(user).salt().to_vec())
            .collect();
        assert_eq!(salts.len(), 3);

        // A second store keys its mock salts differently
        assert_ne!(
            store.scram_secret("nobody").salt(),
            self::store().scram_secret("nobody").salt()
        );
    }

    #[test]
    fn test_unknown_user_fails_like_wrong_password() {
        let store = store();
        let unknown = store.verify_password("nobody", "secret").unwrap_err();
        let wrong = store.verify_password("sam", "wrong").unwrap_err();
        assert_eq!(
            unknown.to_string().replace("nobody", "sam"),
            wrong.to_string()
        );
    }
}

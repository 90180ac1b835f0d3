//! Authentication Types

use std::collections::HashMap;

use crate::protocol::method;

/// Payload key under which the user/pass method records the username
pub const USERNAME_KEY: &str = "username";

/// Result of a successful authentication, carried with the request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    /// Method code the client authenticated with
    pub method: u8,
    /// Method-specific facts, e.g. the authenticated username
    pub payload: HashMap<String, String>,
}

impl AuthContext {
    pub fn no_auth() -> Self {
        Self {
            method: method::NO_AUTH,
            payload: HashMap::new(),
        }
    }

    pub fn user_pass(username: impl Into<String>) -> Self {
        let mut payload = HashMap::new();
        payload.insert(USERNAME_KEY.to_string(), username.into());
        Self {
            method: method::USER_PASS,
            payload,
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.payload.get(USERNAME_KEY).map(String::as_str)
    }
}

/// Outcome of a credential check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Valid,
    Invalid,
}

impl Outcome {
    pub fn is_valid(self) -> bool {
        self == Outcome::Valid
    }
}

impl From<bool> for Outcome {
    fn from(valid: bool) -> Self {
        if valid {
            Outcome::Valid
        } else {
            Outcome::Invalid
        }
    }
}

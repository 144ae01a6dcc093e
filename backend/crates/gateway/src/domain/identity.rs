//! Authenticated caller

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric user id assigned by the identity store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Caller established from a verified token.
///
/// Lives for one request and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    subject: String,
    user_id: Option<UserId>,
    roles: Vec<String>,
}

impl Identity {
    pub fn new(subject: impl Into<String>, user_id: Option<UserId>, roles: Vec<String>) -> Self {
        Self {
            subject: subject.into(),
            user_id,
            roles,
        }
    }

    /// `sub` claim
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The identity store signs the username as the subject
    pub fn username(&self) -> &str {
        &self.subject
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Key used for quotas and buckets: the user id, else the subject
    pub fn principal(&self) -> String {
        match self.user_id {
            Some(id) => id.to_string(),
            None => self.subject.clone(),
        }
    }
}

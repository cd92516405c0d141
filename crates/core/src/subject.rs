//! Subjects: the actors actions are attributed to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of an authenticated (or pseudo-identified) actor.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    /// Maximum accepted length for a subject identifier.
    pub const MAX_LEN: usize = 256;

    /// Parse a subject, rejecting empty or oversized values.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.trim().is_empty() {
            return Err(crate::Error::InvalidId("subject cannot be empty".to_string()));
        }
        if s.len() > Self::MAX_LEN {
            return Err(crate::Error::InvalidId(format!(
                "subject exceeds {} characters",
                Self::MAX_LEN
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Pseudo-subject for a request without an identity.
    pub fn anonymous(addr: impl fmt::Display) -> Self {
        Self(format!("ip:{addr}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subject({})", self.0)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-request identity supplied by the identity collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub subject: Subject,
    /// Whether the subject holds elevated (moderator/admin) privilege.
    pub elevated: bool,
}

impl Identity {
    pub fn new(subject: Subject, elevated: bool) -> Self {
        Self { subject, elevated }
    }

    /// True if this identity may act on resources owned by `owner`.
    pub fn can_act_for(&self, owner: &Subject) -> bool {
        self.elevated || &self.subject == owner
    }
}

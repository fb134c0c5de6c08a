//! Failure classification.
//!
//! Maps a handler error to one of four failure types through an explicit
//! category table:
//!
//! | Category | Failure type |
//! |---|---|
//! | `Timeout`, `Transport`, `DependencyUnavailable` | `Transient` |
//! | `MalformedInput`, `Validation`, `BusinessRule` | `Permanent` |
//! | `ResourceExhausted` | `Critical` |
//! | anything else | `Unknown` |

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{ErrorKind, HandlerError};

/// Classification of an observed failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FailureType {
    /// Expected to self-resolve; worth retrying.
    Transient,
    /// Retrying cannot change the outcome.
    Permanent,
    /// Retrying risks system health; escalate immediately.
    Critical,
    /// Not in the table.
    Unknown,
}

impl FailureType {
    /// Returns the canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::Transient => "Transient",
            FailureType::Permanent => "Permanent",
            FailureType::Critical => "Critical",
            FailureType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const DEFAULT_TABLE: &[(ErrorKind, FailureType)] = &[
    (ErrorKind::Timeout, FailureType::Transient),
    (ErrorKind::Transport, FailureType::Transient),
    (ErrorKind::DependencyUnavailable, FailureType::Transient),
    (ErrorKind::MalformedInput, FailureType::Permanent),
    (ErrorKind::Validation, FailureType::Permanent),
    (ErrorKind::BusinessRule, FailureType::Permanent),
    (ErrorKind::ResourceExhausted, FailureType::Critical),
];

/// Classifies handler errors by category.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    table: HashMap<ErrorKind, FailureType>,
}

impl FailureClassifier {
    /// Creates a classifier with the default table.
    pub fn new() -> Self {
        Self {
            table: DEFAULT_TABLE.iter().copied().collect(),
        }
    }

    /// Adds or overrides a table entry.
    pub fn with_mapping(mut self, kind: ErrorKind, failure_type: FailureType) -> Self {
        self.table.insert(kind, failure_type);
        self
    }

    /// Classifies an error. Total: unmapped categories yield `Unknown`.
    pub fn classify(&self, error: &HandlerError) -> FailureType {
        self.classify_kind(error.kind())
    }

    /// Classifies a bare category.
    pub fn classify_kind(&self, kind: ErrorKind) -> FailureType {
        self.table.get(&kind).copied().unwrap_or(FailureType::Unknown)
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new()
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Label the worker reports once it has finished with an image.
pub const DEFAULT_TERMINAL_STATUS: &str = "Accepted";

/// One reported state transition. The vocabulary belongs to the worker;
/// the relay treats it as an opaque label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusValue(String);

impl StatusValue {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StatusValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StatusValue {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The set of labels that end a lifecycle. Matching is exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalPolicy {
    terminal: BTreeSet<String>,
}

impl TerminalPolicy {
    /// Builds a policy from labels, ignoring blanks. Returns `None` when no
    /// usable label remains.
    pub fn new<I, S>(labels: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terminal: BTreeSet<String> = labels
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if terminal.is_empty() {
            None
        } else {
            Some(Self { terminal })
        }
    }

    pub fn is_terminal(&self, status: &StatusValue) -> bool {
        self.terminal.contains(status.as_str())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.terminal.iter().map(String::as_str)
    }
}

impl Default for TerminalPolicy {
    fn default() -> Self {
        Self {
            terminal: BTreeSet::from([DEFAULT_TERMINAL_STATUS.to_string()]),
        }
    }
}

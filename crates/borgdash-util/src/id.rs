//! Prefixed ULID identifiers.
//!
//! Identifiers follow the pattern `prefix_ulid`, for example
//! `wsub_01hqxyz...` for a watch subscription. ULIDs sort by creation time,
//! so ids from one process compare in the order they were made.

use ulid::Ulid;

/// What an identifier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    /// A live watch subscription on a configuration path.
    Subscription,
    /// A single store operation, used to correlate log lines.
    Operation,
}

impl IdPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Subscription => "wsub",
            IdPrefix::Operation => "op",
        }
    }
}

/// Identifier generation.
pub struct Identifier;

impl Identifier {
    /// New identifier with the given prefix. Later ids compare greater.
    pub fn new(prefix: IdPrefix) -> String {
        format!("{}_{}", prefix.as_str(), Ulid::new().to_string().to_lowercase())
    }

    /// Generate a watch subscription ID.
    pub fn subscription() -> String {
        Self::new(IdPrefix::Subscription)
    }

    /// Generate an operation ID.
    pub fn operation() -> String {
        Self::new(IdPrefix::Operation)
    }
}

//! ID generation utilities.

use ulid::Ulid;

/// ID generator for local records and activity IDs.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new lower-cased ULID.
    ///
    /// Used both as primary key for ingested records and as the trailing
    /// segment of outbound activity IDs, so it has to be URL-safe.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }
}

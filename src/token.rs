use std::fmt;

/// How many leading characters of a credential may appear in logs and
/// reports. Everything past the prefix is replaced with an ellipsis.
pub const REDACTED_PREFIX_LEN: usize = 6;

/// An authentication token for one gateway session. The raw value only
/// leaves this type through `expose()`, which is called at the two places
/// that actually put it on the wire; `Debug` and `redacted()` never show
/// more than the prefix.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    /// The raw token, for the identify payload and the Authorization header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Log-safe form: a bounded prefix followed by an ellipsis.
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(REDACTED_PREFIX_LEN).collect();
        format!("{prefix}\u{2026}")
    }

    /// Cheap shape check used before spending a network round trip: real
    /// tokens are either dotted triplets or long opaque strings.
    pub fn looks_valid(&self) -> bool {
        let raw = self.0.as_str();
        raw.len() >= 20 && (raw.contains('.') || raw.len() >= 50)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.redacted()).finish()
    }
}

//! Job identity and result correlation.
//!
//! The producer and consumer never share state directly; the only thing that
//! ties a result message back to the request that caused it is a naming
//! convention over object-store keys:
//!
//! - A *request key* is `{session_id}_{file_name}`, namespaced by a random
//!   per-run session id so overlapping runs cannot collide on object names.
//! - A *result key* is the request key with a fixed `resized_` prefix.
//!
//! Both sides must apply exactly the same derivation. An asymmetry here does
//! not produce an error anywhere; it produces a result that never matches and
//! a producer that blocks forever, so these functions are the single shared
//! definition for both roles.

use uuid::Uuid;

/// Prefix that marks a queue message body (and store key) as a result.
pub const RESULT_PREFIX: &str = "resized_";

/// One producer run's namespace.
///
/// The id is generated once at construction and threaded through explicitly;
/// it is not process-global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
}

impl Session {
    /// Creates a session with a fresh random id.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
        }
    }

    /// Creates a session with a caller-chosen id. Intended for tests and
    /// for reproducing a specific run.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Returns the session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Derives the request key for a local file name.
    ///
    /// Collision freedom rests on the session-scoped randomness, not on
    /// filename uniqueness across runs.
    pub fn request_key(&self, file_name: &str) -> String {
        format!("{}_{}", self.id, file_name)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Derives the result key for a request key.
pub fn result_key(request_key: &str) -> String {
    format!("{RESULT_PREFIX}{request_key}")
}

/// Returns whether a message body names a result rather than a request.
pub fn is_result(body: &str) -> bool {
    body.starts_with(RESULT_PREFIX)
}

/// Returns whether a message body is the result for the given request key.
pub fn matches(body: &str, request_key: &str) -> bool {
    body == result_key(request_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_key_shape() {
        let session = Session::with_id("S1");
        assert_eq!(session.request_key("cat.png"), "S1_cat.png");
    }

    #[test]
    fn test_result_key_derivation() {
        assert_eq!(result_key("S1_cat.png"), "resized_S1_cat.png");
    }

    #[test]
    fn test_is_result() {
        assert!(is_result(&result_key("S1_cat.png")));
        assert!(is_result("resized_anything"));
        assert!(!is_result("S1_cat.png"));
        assert!(!is_result(""));
    }

    #[test]
    fn test_matches_exact_only() {
        let key = "S1_cat.png";
        assert!(matches("resized_S1_cat.png", key));
        // Prefix alone is not enough; the match is on the full derived key.
        assert!(!matches("resized_S1_cat.png.bak", key));
        assert!(!matches("resized_S2_cat.png", key));
        assert!(!matches("S1_cat.png", key));
    }

    #[test]
    fn test_sessions_are_distinct() {
        let a = Session::new();
        let b = Session::new();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.request_key("x.png"), b.request_key("x.png"));
    }

    #[test]
    fn test_distinct_files_distinct_keys() {
        let session = Session::new();
        assert_ne!(session.request_key("a.png"), session.request_key("b.png"));
    }
}

//! Email normalization.
//!
//! A user's stable key is derived deterministically from the account email:
//! lowercase, with `@` and `.` replaced by `_`.  The derivation is pure and
//! this function is the only place it is defined; the directory, the
//! conversation store, and the search index all key on its output.

use crate::error::SharedError;
use crate::types::UserId;

/// Derive the normalized identifier for an account email.
///
/// `Alice@X.com` becomes `alice_x_com`.
pub fn normalize_email(email: &str) -> Result<UserId, SharedError> {
    let trimmed = email.trim();
    if trimmed.is_empty() {
        return Err(SharedError::EmptyEmail);
    }

    let normalized: String = trimmed
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '@' | '.' => '_',
            other => other,
        })
        .collect();

    Ok(UserId(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_substitutes_separators() {
        let id = normalize_email("Alice@X.com").unwrap();
        assert_eq!(id.as_str(), "alice_x_com");
    }

    #[test]
    fn already_normalized_is_stable() {
        let once = normalize_email("bob@example.org").unwrap();
        let twice = normalize_email(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn blank_email_rejected() {
        assert!(normalize_email("   ").is_err());
        assert!(normalize_email("").is_err());
    }
}

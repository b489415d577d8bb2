//! Input normalisation and validation helpers.

use crate::constants::ACCESS_CODE_ALPHABET;
use rand::Rng;

/// Normalise an e-mail address for lookups and writes.
///
/// # Examples
///
/// ```
/// use daycare_identity::utils::normalize_email;
///
/// assert_eq!(normalize_email("  Parent@Example.COM "), "parent@example.com");
/// ```
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Normalise an access code as typed by a parent.
///
/// # Examples
///
/// ```
/// use daycare_identity::utils::normalize_access_code;
///
/// assert_eq!(normalize_access_code(" abc123 "), "ABC123");
/// ```
#[must_use]
pub fn normalize_access_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Validate email address format.
///
/// This performs basic validation:
/// - Must contain exactly one `@`
/// - Must have non-empty local and domain parts
/// - Domain must contain a dot
/// - Length must be between 3 and 254 characters
///
/// # Examples
///
/// ```
/// use daycare_identity::utils::is_valid_email;
///
/// assert!(is_valid_email("a@x.com"));
/// assert!(!is_valid_email("a@x"));
/// assert!(!is_valid_email("@x.com"));
/// ```
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 3 || email.len() > 254 {
        return false;
    }

    let mut parts = email.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

/// Generate a random access code from the unambiguous alphabet.
#[must_use]
pub fn generate_access_code<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| char::from(ACCESS_CODE_ALPHABET[rng.gen_range(0..ACCESS_CODE_ALPHABET.len())]))
        .collect()
}

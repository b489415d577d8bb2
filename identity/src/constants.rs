//! Identity constants.
//!
//! Collection names and identifiers shared by the document store and the
//! identity provider client.

/// Document store collection names.
pub mod collections {
    /// Application accounts, keyed by principal uid.
    pub const ACCOUNTS: &str = "users";

    /// Child records created by admins.
    pub const CHILDREN: &str = "children";

    /// Invitation codes gating parent self-registration.
    pub const ACCESS_CODES: &str = "accessCodes";

    /// System flags.
    pub const SYSTEM: &str = "system";

    /// Document id of the one-time admin bootstrap flag.
    pub const ADMIN_SETUP: &str = "admin_setup";
}

/// Provider ids as reported by the identity provider.
pub mod provider_ids {
    /// Email/password credential.
    pub const PASSWORD: &str = "password";

    /// Google federated credential.
    pub const GOOGLE: &str = "google.com";
}

/// Minimum password length enforced by the identity provider itself.
pub const PROVIDER_MIN_PASSWORD_LENGTH: usize = 6;

/// Alphabet for generated access codes (no `0/O`, `1/I/L`).
pub const ACCESS_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

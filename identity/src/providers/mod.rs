//! Collaborator interfaces and document models.
//!
//! This module defines traits for the two external dependencies of the
//! identity subsystem, plus the documents they exchange:
//!
//! - [`IdentityProvider`]: the external auth service (password, popup OAuth,
//!   verification mail, password reset, principal deletion).
//! - [`DocumentStore`]: the cloud document database (accounts, child records,
//!   access codes, system flags).
//!
//! # Architecture
//!
//! Providers are **interfaces**, not implementations. The session manager
//! depends on these traits; the host application supplies concrete clients.
//!
//! ```text
//! ┌──────────────────┐   principals    ┌──────────────────┐
//! │ IdentityProvider │ ──────────────▶ │ SessionManager   │
//! └──────────────────┘                 │ - authorizes     │
//!                                      │ - reconciles     │
//! ┌──────────────────┐   documents     │ - compensates    │
//! │ DocumentStore    │ ◀─────────────▶ └──────────────────┘
//! └──────────────────┘
//! ```
//!
//! Every store mutation that races with another client (access-code
//! redemption, account creation, child linking) is a single atomic store
//! primitive. The manager never reads a document and writes it back.

use crate::state::{AccountId, ChildId, Role, SignInMethod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub mod identity;
pub mod store;

pub use identity::{FederatedProvider, FederatedSignIn, IdentityProvider, Principal};
pub use store::{CodeRedemption, CodeRegistration, DocumentStore};

// ═══════════════════════════════════════════════════════════════════════
// Accounts
// ═══════════════════════════════════════════════════════════════════════

/// Editable profile fields of an account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    /// Display name.
    pub display_name: Option<String>,

    /// First name.
    pub first_name: Option<String>,

    /// Last name.
    pub last_name: Option<String>,

    /// Phone number.
    pub phone: Option<String>,

    /// Profile picture URL.
    pub photo_url: Option<String>,
}

impl Profile {
    /// Display name, falling back to "first last".
    #[must_use]
    pub fn resolved_display_name(&self) -> Option<String> {
        if let Some(name) = self.display_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return Some(name.to_string());
        }

        let joined = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        (!joined.is_empty()).then_some(joined)
    }
}

/// Application account document.
///
/// Stored in the `users` collection under the principal uid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Account id (principal uid).
    pub id: AccountId,

    /// Normalised e-mail address.
    pub email: String,

    /// Role.
    pub role: Role,

    /// Credential kinds this account has signed in with.
    pub sign_in_methods: BTreeSet<SignInMethod>,

    /// Whether a federated credential is considered linked.
    pub google_linked: bool,

    /// Federated sign-in blocked by the account owner.
    pub google_sign_in_disabled: bool,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last successful sign-in.
    pub last_login: Option<DateTime<Utc>>,

    /// Profile fields.
    #[serde(flatten)]
    pub profile: Profile,

    /// Account was recreated from orphaned child records.
    #[serde(default)]
    pub restored_account: bool,

    /// Access code redeemed at registration (or inferred on restore).
    pub access_code: Option<String>,
}

impl Account {
    /// Create an account with only a password credential.
    #[must_use]
    pub fn new(id: AccountId, email: String, role: Role, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email,
            role,
            sign_in_methods: BTreeSet::from([SignInMethod::Password]),
            google_linked: false,
            google_sign_in_disabled: false,
            created_at: now,
            last_login: None,
            profile: Profile::default(),
            restored_account: false,
            access_code: None,
        }
    }

    /// Create a parent account with only a password credential.
    #[must_use]
    pub fn new_parent(id: AccountId, email: String, now: DateTime<Utc>) -> Self {
        Self::new(id, email, Role::Parent, now)
    }

    /// Returns `true` if the account lists the given credential kind.
    #[must_use]
    pub fn has_method(&self, method: SignInMethod) -> bool {
        self.sign_in_methods.contains(&method)
    }

    /// Checks `federated ∈ sign_in_methods ⇔ google_linked`.
    ///
    /// A disabled account is always consistent: the disable flag overrides
    /// whatever the other two fields say.
    #[must_use]
    pub fn federated_consistent(&self) -> bool {
        self.google_sign_in_disabled || self.has_method(SignInMethod::Federated) == self.google_linked
    }

    /// Apply a merge patch in place.
    pub fn apply(&mut self, patch: &AccountPatch) {
        for method in &patch.add_methods {
            self.sign_in_methods.insert(*method);
        }
        for method in &patch.remove_methods {
            self.sign_in_methods.remove(method);
        }
        if let Some(linked) = patch.google_linked {
            self.google_linked = linked;
        }
        if let Some(disabled) = patch.google_sign_in_disabled {
            self.google_sign_in_disabled = disabled;
        }
        if let Some(last_login) = patch.last_login {
            self.last_login = Some(last_login);
        }
        if let Some(name) = &patch.display_name {
            self.profile.display_name = Some(name.clone());
        }
        if let Some(photo) = &patch.photo_url {
            self.profile.photo_url = Some(photo.clone());
        }
    }
}

/// Field-level merge applied by [`DocumentStore::merge_account`].
///
/// `None` leaves the stored field untouched. Role is deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountPatch {
    /// Credential kinds to add.
    pub add_methods: Vec<SignInMethod>,

    /// Credential kinds to remove.
    pub remove_methods: Vec<SignInMethod>,

    /// New `google_linked` value.
    pub google_linked: Option<bool>,

    /// New `google_sign_in_disabled` value.
    pub google_sign_in_disabled: Option<bool>,

    /// New `last_login` value.
    pub last_login: Option<DateTime<Utc>>,

    /// New display name.
    pub display_name: Option<String>,

    /// New photo URL.
    pub photo_url: Option<String>,
}

impl AccountPatch {
    /// Returns `true` if applying the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Access codes
// ═══════════════════════════════════════════════════════════════════════

/// One redemption of an access code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    /// Account that redeemed the code.
    pub account_id: AccountId,

    /// E-mail used at registration.
    pub email: String,

    /// Redemption timestamp.
    pub used_at: DateTime<Utc>,
}

/// Invitation code gating parent self-registration.
///
/// Stored in the `accessCodes` collection under the normalised code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCode {
    /// Normalised code (unique).
    pub code: String,

    /// Remaining redemptions. Unsigned, so it can never go negative.
    pub uses_left: u32,

    /// Expiry timestamp.
    pub expires_at: DateTime<Utc>,

    /// Redemption history (append-only).
    #[serde(default)]
    pub used_by: Vec<Redemption>,

    /// Admin who issued the code.
    pub created_by: Option<AccountId>,

    /// Issue timestamp.
    pub created_at: DateTime<Utc>,
}

impl AccessCode {
    /// Reason the code cannot be redeemed at `now`, if any.
    #[must_use]
    pub fn rejection(&self, now: DateTime<Utc>) -> Option<crate::access_code::AccessCodeRejection> {
        use crate::access_code::AccessCodeRejection;

        if self.uses_left == 0 {
            Some(AccessCodeRejection::Exhausted)
        } else if self.expires_at <= now {
            Some(AccessCodeRejection::Expired)
        } else {
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Child records
// ═══════════════════════════════════════════════════════════════════════

/// Child record created by an admin.
///
/// Created with `parent_registered = false`; linked to a parent account at
/// registration or later by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildRecord {
    /// Record id.
    pub id: ChildId,

    /// Child's first name.
    pub first_name: String,

    /// Child's last name.
    pub last_name: String,

    /// Normalised e-mail of the expected parent.
    pub parent_email: String,

    /// Parent first name as entered by the admin.
    pub parent_first_name: Option<String>,

    /// Parent last name as entered by the admin.
    pub parent_last_name: Option<String>,

    /// Linked parent account.
    pub parent_id: Option<AccountId>,

    /// Whether a parent account has been linked.
    pub parent_registered: bool,

    /// Access code issued for this family.
    pub access_code: Option<String>,
}

impl ChildRecord {
    /// Returns `true` if the record still waits for a parent account.
    #[must_use]
    pub const fn is_orphaned(&self) -> bool {
        !self.parent_registered
    }
}

// ═══════════════════════════════════════════════════════════════════════
// System flags
// ═══════════════════════════════════════════════════════════════════════

/// `system/admin_setup` flag, written once at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemFlag {
    /// Bootstrap completed.
    pub initialized: bool,

    /// The first admin account.
    pub initial_admin_id: Option<AccountId>,

    /// When bootstrap completed.
    pub initialized_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_code::AccessCodeRejection;
    use chrono::Duration;

    fn parent() -> Account {
        Account::new_parent(AccountId::new("uid-1"), "a@x.com".to_string(), Utc::now())
    }

    #[test]
    fn test_new_parent_is_consistent() {
        let account = parent();
        assert_eq!(account.role, Role::Parent);
        assert!(account.has_method(SignInMethod::Password));
        assert!(account.federated_consistent());
    }

    #[test]
    fn test_federated_consistency_and_disable_override() {
        let mut account = parent();
        account.sign_in_methods.insert(SignInMethod::Federated);
        assert!(!account.federated_consistent());

        account.google_sign_in_disabled = true;
        assert!(account.federated_consistent());
    }

    #[test]
    fn test_apply_patch_adds_and_removes_methods() {
        let mut account = parent();
        account.apply(&AccountPatch {
            add_methods: vec![SignInMethod::Federated],
            google_linked: Some(true),
            ..AccountPatch::default()
        });
        assert!(account.has_method(SignInMethod::Federated));
        assert!(account.federated_consistent());

        account.apply(&AccountPatch {
            remove_methods: vec![SignInMethod::Federated],
            google_linked: Some(false),
            google_sign_in_disabled: Some(true),
            ..AccountPatch::default()
        });
        assert!(!account.has_method(SignInMethod::Federated));
        assert!(account.google_sign_in_disabled);
        assert_eq!(account.role, Role::Parent);
    }

    #[test]
    fn test_account_document_uses_camel_case() {
        let json = serde_json::to_value(parent()).unwrap();
        assert_eq!(json["role"], "parent");
        assert_eq!(json["signInMethods"], serde_json::json!(["password"]));
        assert_eq!(json["googleSignInDisabled"], false);
        assert!(json.get("displayName").is_some());
    }

    #[test]
    fn test_access_code_rejection() {
        let now = Utc::now();
        let mut code = AccessCode {
            code: "ABC123".to_string(),
            uses_left: 1,
            expires_at: now + Duration::days(1),
            used_by: Vec::new(),
            created_by: None,
            created_at: now,
        };
        assert_eq!(code.rejection(now), None);

        code.expires_at = now;
        assert_eq!(code.rejection(now), Some(AccessCodeRejection::Expired));

        code.uses_left = 0;
        assert_eq!(code.rejection(now), Some(AccessCodeRejection::Exhausted));
    }

    #[test]
    fn test_profile_display_name_fallback() {
        let profile = Profile {
            first_name: Some("Pat".to_string()),
            last_name: Some("Lee".to_string()),
            ..Profile::default()
        };
        assert_eq!(profile.resolved_display_name().as_deref(), Some("Pat Lee"));
        assert_eq!(Profile::default().resolved_display_name(), None);
    }
}

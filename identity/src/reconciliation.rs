//! Orphan reconciliation.
//!
//! Runs whenever the identity provider reports a principal that has no
//! account document, e.g. after the account document was lost while the
//! provider credential and the child records survived.
//!
//! ```text
//! principal ──▶ account exists? ──yes──▶ Existing
//!                    │ no
//!                    ▼
//!             federated only? ──yes──▶ UnauthorizedBypass (caller compensates)
//!                    │ no
//!                    ▼
//!             orphaned children? ──yes──▶ create + link in one txn ──▶ Restored
//!                    │ no
//!                    ▼
//!             minimal parent account ──▶ Created
//! ```
//!
//! Both create paths are create-if-absent, so a second run for the same
//! principal finds the account and links nothing.

use crate::environment::Clock;
use crate::error::{AuthError, Result, StoreError};
use crate::metrics;
use crate::providers::{Account, ChildRecord, DocumentStore, Principal, Profile};
use crate::utils::normalize_email;

/// Outcome of reconciling one principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// An account already existed; nothing was written.
    Existing(Account),

    /// An account was recreated from orphaned child records.
    Restored {
        /// The restored account.
        account: Account,
        /// Number of child records linked.
        linked: usize,
    },

    /// A minimal parent account was created.
    Created(Account),

    /// A federated-only principal has no account. Federated sign-in never
    /// originates accounts; the caller must remove the principal.
    UnauthorizedBypass,
}

impl Reconciliation {
    const fn label(&self) -> &'static str {
        match self {
            Self::Existing(_) => "existing",
            Self::Restored { .. } => "restored",
            Self::Created(_) => "created",
            Self::UnauthorizedBypass => "bypass",
        }
    }

    /// The account the principal ends up with, if any.
    #[must_use]
    pub fn into_account(self) -> Option<Account> {
        match self {
            Self::Existing(account) | Self::Created(account) | Self::Restored { account, .. } => Some(account),
            Self::UnauthorizedBypass => None,
        }
    }
}

/// Reconciles provider principals with account documents.
#[derive(Debug)]
pub struct Reconciler<'a, D, C> {
    store: &'a D,
    clock: &'a C,
    link_orphans: bool,
}

impl<'a, D, C> Reconciler<'a, D, C>
where
    D: DocumentStore,
    C: Clock,
{
    /// Create a reconciler that links orphaned child records.
    #[must_use]
    pub const fn new(store: &'a D, clock: &'a C) -> Self {
        Self {
            store,
            clock,
            link_orphans: true,
        }
    }

    /// Enable or disable orphan linking (accounts are still created).
    #[must_use]
    pub const fn with_orphan_linking(mut self, enabled: bool) -> Self {
        self.link_orphans = enabled;
        self
    }

    /// Reconcile a principal.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read or written.
    pub async fn reconcile(&self, principal: &Principal) -> Result<Reconciliation> {
        let outcome = self.run(principal).await?;

        tracing::info!(
            uid = %principal.uid,
            outcome = outcome.label(),
            "Reconciliation finished"
        );
        metrics::counter!(metrics::RECONCILIATION_TOTAL, "outcome" => outcome.label()).increment(1);

        Ok(outcome)
    }

    async fn run(&self, principal: &Principal) -> Result<Reconciliation> {
        let email = normalize_email(&principal.email);

        if let Some(account) = self.existing(principal, &email).await? {
            return Ok(Reconciliation::Existing(account));
        }

        if principal.is_federated_only() {
            return Ok(Reconciliation::UnauthorizedBypass);
        }

        let orphans = if self.link_orphans {
            self.store.orphaned_children(&email).await?
        } else {
            Vec::new()
        };

        let mut account = Account::new_parent(principal.uid.clone(), email.clone(), self.clock.now());
        account.profile.display_name.clone_from(&principal.display_name);
        account.profile.photo_url.clone_from(&principal.photo_url);

        let Some(first) = orphans.first() else {
            return match self.store.create_account(&account).await {
                Ok(()) => Ok(Reconciliation::Created(account)),
                Err(StoreError::AlreadyExists) => self.lost_race(principal, &email).await,
                Err(error) => Err(error.into()),
            };
        };

        if orphans.iter().any(|child| disagrees(first, child)) {
            tracing::warn!(
                %email,
                orphans = orphans.len(),
                "Orphaned children disagree on parent name or access code; using the first record"
            );
        }

        account.restored_account = true;
        account.access_code.clone_from(&first.access_code);
        account.profile = Profile {
            first_name: first.parent_first_name.clone(),
            last_name: first.parent_last_name.clone(),
            photo_url: principal.photo_url.clone(),
            ..Profile::default()
        };
        account.profile.display_name = account
            .profile
            .resolved_display_name()
            .or_else(|| principal.display_name.clone());

        let ids: Vec<_> = orphans.iter().map(|child| child.id).collect();
        match self.store.create_account_with_children(&account, &ids).await {
            Ok(linked) => Ok(Reconciliation::Restored { account, linked }),
            Err(StoreError::AlreadyExists) => self.lost_race(principal, &email).await,
            Err(error) => Err(error.into()),
        }
    }

    async fn existing(&self, principal: &Principal, email: &str) -> Result<Option<Account>> {
        if let Some(account) = self.store.get_account(&principal.uid).await? {
            return Ok(Some(account));
        }
        Ok(self.store.find_account_by_email(email).await?)
    }

    async fn lost_race(&self, principal: &Principal, email: &str) -> Result<Reconciliation> {
        tracing::debug!(uid = %principal.uid, "Account created concurrently");
        self.existing(principal, email)
            .await?
            .map(Reconciliation::Existing)
            .ok_or(AuthError::ConcurrentModification)
    }
}

fn disagrees(first: &ChildRecord, other: &ChildRecord) -> bool {
    first.parent_first_name != other.parent_first_name
        || first.parent_last_name != other.parent_last_name
        || first.access_code != other.access_code
}

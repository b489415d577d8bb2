//! Document store trait.

use crate::access_code::AccessCodeRejection;
use crate::error::StoreResult;
use crate::state::{AccountId, ChildId};
use super::{AccessCode, Account, AccountPatch, ChildRecord, Redemption, SystemFlag};

/// Outcome of an atomic access-code redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeRedemption {
    /// The code was valid; `uses_left` was decremented and the redemption appended.
    Redeemed(AccessCode),

    /// The code was invalid at redemption time; nothing was written.
    Rejected(AccessCodeRejection),
}

/// Outcome of creating an account that redeems an access code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeRegistration {
    /// Account written, one use redeemed and child records linked.
    Created {
        /// The code after redemption.
        code: AccessCode,
        /// Number of child records linked.
        linked: usize,
    },

    /// The code was invalid at commit time; nothing was written.
    Rejected(AccessCodeRejection),
}

/// Document store.
///
/// This trait abstracts over the cloud document database.
///
/// # Implementation Notes
///
/// - **CRITICAL**: `redeem_access_code()`, `create_account_with_children()`
///   and `create_account_with_code()` MUST be atomic (database transaction or conditional update). Two
///   concurrent calls against the same code or account must not both succeed.
/// - Create operations are create-if-absent and report
///   `StoreError::AlreadyExists` instead of overwriting.
pub trait DocumentStore: Send + Sync {
    /// Read an account by id.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn get_account(
        &self,
        id: &AccountId,
    ) -> impl std::future::Future<Output = StoreResult<Option<Account>>> + Send;

    /// Find an account by normalised e-mail.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn find_account_by_email(
        &self,
        email: &str,
    ) -> impl std::future::Future<Output = StoreResult<Option<Account>>> + Send;

    /// Create an account (create-if-absent).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the id or e-mail is taken.
    fn create_account(
        &self,
        account: &Account,
    ) -> impl std::future::Future<Output = StoreResult<()>> + Send;

    /// Create an account and link child records in one transaction.
    ///
    /// Only records still unregistered at commit time are linked.
    ///
    /// # Returns
    ///
    /// Number of child records linked.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` (and writes nothing) if the account exists.
    fn create_account_with_children(
        &self,
        account: &Account,
        children: &[ChildId],
    ) -> impl std::future::Future<Output = StoreResult<usize>> + Send;

    /// Create an account, redeem one use of `code` and link child records,
    /// all in one transaction.
    ///
    /// Code validity is re-checked against `redemption.used_at` at commit
    /// time. Either everything is written or nothing is.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` (and writes nothing) if the account exists.
    fn create_account_with_code(
        &self,
        account: &Account,
        children: &[ChildId],
        code: &str,
        redemption: &Redemption,
    ) -> impl std::future::Future<Output = StoreResult<CodeRegistration>> + Send;

    /// Merge fields into an existing account.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account does not exist.
    fn merge_account(
        &self,
        id: &AccountId,
        patch: &AccountPatch,
    ) -> impl std::future::Future<Output = StoreResult<Account>> + Send;

    /// Delete an account document.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn delete_account(
        &self,
        id: &AccountId,
    ) -> impl std::future::Future<Output = StoreResult<()>> + Send;

    /// Read an access code by normalised code.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn get_access_code(
        &self,
        code: &str,
    ) -> impl std::future::Future<Output = StoreResult<Option<AccessCode>>> + Send;

    /// Create an access code (create-if-absent).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the code is taken.
    fn create_access_code(
        &self,
        code: &AccessCode,
    ) -> impl std::future::Future<Output = StoreResult<()>> + Send;

    /// Atomically redeem an access code.
    ///
    /// Validity is re-checked against `redemption.used_at` inside the
    /// transaction; `uses_left` is decremented and the redemption appended
    /// only if the code is still valid.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable or the transaction aborts.
    fn redeem_access_code(
        &self,
        code: &str,
        redemption: &Redemption,
    ) -> impl std::future::Future<Output = StoreResult<CodeRedemption>> + Send;

    /// Child records with `parent_email == email` and `parent_registered == false`.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn orphaned_children(
        &self,
        parent_email: &str,
    ) -> impl std::future::Future<Output = StoreResult<Vec<ChildRecord>>> + Send;

    /// Unregistered child records issued with the given access code.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn unregistered_children_for_code(
        &self,
        code: &str,
    ) -> impl std::future::Future<Output = StoreResult<Vec<ChildRecord>>> + Send;

    /// Child records linked to a parent account.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn children_of(
        &self,
        parent_id: &AccountId,
    ) -> impl std::future::Future<Output = StoreResult<Vec<ChildRecord>>> + Send;

    /// Create a child record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the id is taken.
    fn create_child_record(
        &self,
        child: &ChildRecord,
    ) -> impl std::future::Future<Output = StoreResult<()>> + Send;

    /// Read the admin bootstrap flag.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn admin_setup(&self) -> impl std::future::Future<Output = StoreResult<Option<SystemFlag>>> + Send;

    /// Write the admin bootstrap flag (create-if-absent).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if bootstrap already ran.
    fn initialize_admin_setup(
        &self,
        flag: &SystemFlag,
    ) -> impl std::future::Future<Output = StoreResult<()>> + Send;
}

//! Mock document store for testing.

use crate::access_code::AccessCodeRejection;
use crate::constants::collections;
use crate::error::{StoreError, StoreResult};
use crate::providers::{
    AccessCode, Account, AccountPatch, ChildRecord, CodeRedemption, CodeRegistration, DocumentStore, Redemption, SystemFlag,
};
use crate::state::{AccountId, ChildId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Collections {
    accounts: HashMap<AccountId, Account>,
    access_codes: HashMap<String, AccessCode>,
    // Insertion order matters for reconciliation.
    children: Vec<ChildRecord>,
    admin_setup: Option<SystemFlag>,
}

/// Mock document store.
///
/// In-memory store where every operation runs under a single mutex, so the
/// atomic primitives (`redeem_access_code`, `create_account_with_children`,
/// the create-if-absent writes) behave like transactions.
#[derive(Debug, Clone, Default)]
pub struct MockDocumentStore {
    data: Arc<Mutex<Collections>>,
    unavailable: Arc<AtomicBool>,
    link_batches: Arc<AtomicUsize>,
}

impl MockDocumentStore {
    /// Create an empty mock store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable` (for testing).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of account-plus-children transactions that linked at least one record.
    #[must_use]
    pub fn link_batches(&self) -> usize {
        self.link_batches.load(Ordering::SeqCst)
    }

    /// All stored accounts (for testing).
    #[must_use]
    pub fn accounts(&self) -> Vec<Account> {
        self.lock().accounts.values().cloned().collect()
    }

    /// Number of stored accounts (for testing).
    #[must_use]
    pub fn account_count(&self) -> usize {
        self.lock().accounts.len()
    }

    /// All child records in insertion order (for testing).
    #[must_use]
    pub fn children(&self) -> Vec<ChildRecord> {
        self.lock().children.clone()
    }

    /// Overwrite an account document without checks (for testing).
    pub fn put_account(&self, account: Account) {
        self.lock().accounts.insert(account.id.clone(), account);
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link_children(&self, data: &mut Collections, parent: &AccountId, children: &[ChildId]) -> usize {
        let mut linked = 0;
        for child in data
            .children
            .iter_mut()
            .filter(|child| child.is_orphaned() && children.contains(&child.id))
        {
            child.parent_id = Some(parent.clone());
            child.parent_registered = true;
            linked += 1;
        }

        if linked > 0 {
            self.link_batches.fetch_add(1, Ordering::SeqCst);
        }
        linked
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("mock store offline".to_string()));
        }
        Ok(())
    }
}

fn email_taken(data: &Collections, email: &str) -> bool {
    data.accounts.values().any(|account| account.email == email)
}

impl DocumentStore for MockDocumentStore {
    async fn get_account(&self, id: &AccountId) -> StoreResult<Option<Account>> {
        self.check_available()?;
        Ok(self.lock().accounts.get(id).cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        self.check_available()?;
        Ok(self.lock().accounts.values().find(|account| account.email == email).cloned())
    }

    async fn create_account(&self, account: &Account) -> StoreResult<()> {
        self.check_available()?;
        let mut data = self.lock();

        if data.accounts.contains_key(&account.id) || email_taken(&data, &account.email) {
            return Err(StoreError::AlreadyExists);
        }

        tracing::debug!(collection = collections::ACCOUNTS, id = %account.id, "create");
        data.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn create_account_with_children(&self, account: &Account, children: &[ChildId]) -> StoreResult<usize> {
        self.check_available()?;
        let mut data = self.lock();

        if data.accounts.contains_key(&account.id) || email_taken(&data, &account.email) {
            return Err(StoreError::AlreadyExists);
        }

        data.accounts.insert(account.id.clone(), account.clone());
        let linked = self.link_children(&mut data, &account.id, children);

        tracing::debug!(
            collection = collections::ACCOUNTS,
            id = %account.id,
            children = collections::CHILDREN,
            linked,
            "create with children"
        );
        Ok(linked)
    }

    async fn create_account_with_code(
        &self,
        account: &Account,
        children: &[ChildId],
        code: &str,
        redemption: &Redemption,
    ) -> StoreResult<CodeRegistration> {
        self.check_available()?;
        let mut data = self.lock();

        if data.accounts.contains_key(&account.id) || email_taken(&data, &account.email) {
            return Err(StoreError::AlreadyExists);
        }

        let Some(record) = data.access_codes.get_mut(code) else {
            return Ok(CodeRegistration::Rejected(AccessCodeRejection::NotFound));
        };
        if let Some(reason) = record.rejection(redemption.used_at) {
            return Ok(CodeRegistration::Rejected(reason));
        }

        record.uses_left -= 1;
        record.used_by.push(redemption.clone());
        let redeemed = record.clone();

        data.accounts.insert(account.id.clone(), account.clone());
        let linked = self.link_children(&mut data, &account.id, children);

        tracing::debug!(
            collection = collections::ACCOUNTS,
            id = %account.id,
            code,
            uses_left = redeemed.uses_left,
            linked,
            "create with code"
        );
        Ok(CodeRegistration::Created { code: redeemed, linked })
    }

    async fn merge_account(&self, id: &AccountId, patch: &AccountPatch) -> StoreResult<Account> {
        self.check_available()?;
        let mut data = self.lock();

        let account = data.accounts.get_mut(id).ok_or(StoreError::NotFound)?;
        account.apply(patch);

        tracing::debug!(collection = collections::ACCOUNTS, %id, "merge");
        Ok(account.clone())
    }

    async fn delete_account(&self, id: &AccountId) -> StoreResult<()> {
        self.check_available()?;
        self.lock().accounts.remove(id);
        tracing::debug!(collection = collections::ACCOUNTS, %id, "delete");
        Ok(())
    }

    async fn get_access_code(&self, code: &str) -> StoreResult<Option<AccessCode>> {
        self.check_available()?;
        Ok(self.lock().access_codes.get(code).cloned())
    }

    async fn create_access_code(&self, code: &AccessCode) -> StoreResult<()> {
        self.check_available()?;
        let mut data = self.lock();

        if data.access_codes.contains_key(&code.code) {
            return Err(StoreError::AlreadyExists);
        }

        tracing::debug!(collection = collections::ACCESS_CODES, code = %code.code, "create");
        data.access_codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn redeem_access_code(&self, code: &str, redemption: &Redemption) -> StoreResult<CodeRedemption> {
        self.check_available()?;
        let mut data = self.lock();

        let Some(record) = data.access_codes.get_mut(code) else {
            return Ok(CodeRedemption::Rejected(AccessCodeRejection::NotFound));
        };

        if let Some(reason) = record.rejection(redemption.used_at) {
            return Ok(CodeRedemption::Rejected(reason));
        }

        record.uses_left -= 1;
        record.used_by.push(redemption.clone());

        tracing::debug!(collection = collections::ACCESS_CODES, code, uses_left = record.uses_left, "redeem");
        Ok(CodeRedemption::Redeemed(record.clone()))
    }

    async fn orphaned_children(&self, parent_email: &str) -> StoreResult<Vec<ChildRecord>> {
        self.check_available()?;
        Ok(self
            .lock()
            .children
            .iter()
            .filter(|child| child.is_orphaned() && child.parent_email == parent_email)
            .cloned()
            .collect())
    }

    async fn unregistered_children_for_code(&self, code: &str) -> StoreResult<Vec<ChildRecord>> {
        self.check_available()?;
        Ok(self
            .lock()
            .children
            .iter()
            .filter(|child| child.is_orphaned() && child.access_code.as_deref() == Some(code))
            .cloned()
            .collect())
    }

    async fn children_of(&self, parent_id: &AccountId) -> StoreResult<Vec<ChildRecord>> {
        self.check_available()?;
        Ok(self
            .lock()
            .children
            .iter()
            .filter(|child| child.parent_id.as_ref() == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn create_child_record(&self, child: &ChildRecord) -> StoreResult<()> {
        self.check_available()?;
        let mut data = self.lock();

        if data.children.iter().any(|existing| existing.id == child.id) {
            return Err(StoreError::AlreadyExists);
        }

        tracing::debug!(collection = collections::CHILDREN, id = %child.id.0, "create");
        data.children.push(child.clone());
        Ok(())
    }

    async fn admin_setup(&self) -> StoreResult<Option<SystemFlag>> {
        self.check_available()?;
        Ok(self.lock().admin_setup.clone())
    }

    async fn initialize_admin_setup(&self, flag: &SystemFlag) -> StoreResult<()> {
        self.check_available()?;
        let mut data = self.lock();

        if data.admin_setup.is_some() {
            return Err(StoreError::AlreadyExists);
        }

        tracing::debug!(collection = collections::SYSTEM, doc = collections::ADMIN_SETUP, "create");
        data.admin_setup = Some(flag.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn child(email: &str, code: Option<&str>) -> ChildRecord {
        ChildRecord {
            id: ChildId::new(),
            first_name: "Kid".to_string(),
            last_name: "Lee".to_string(),
            parent_email: email.to_string(),
            parent_first_name: Some("Pat".to_string()),
            parent_last_name: Some("Lee".to_string()),
            parent_id: None,
            parent_registered: false,
            access_code: code.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_create_account_rejects_duplicate_email() {
        let store = MockDocumentStore::new();
        let now = Utc::now();
        let first = Account::new_parent(AccountId::new("a"), "p@x.com".to_string(), now);
        let second = Account::new_parent(AccountId::new("b"), "p@x.com".to_string(), now);

        store.create_account(&first).await.unwrap();
        assert_eq!(store.create_account(&second).await, Err(StoreError::AlreadyExists));
        assert_eq!(store.account_count(), 1);
    }

    #[tokio::test]
    async fn test_create_with_children_links_only_orphans() {
        let store = MockDocumentStore::new();
        let orphan = child("p@x.com", None);
        let mut taken = child("p@x.com", None);
        taken.parent_registered = true;
        store.create_child_record(&orphan).await.unwrap();
        store.create_child_record(&taken).await.unwrap();

        let account = Account::new_parent(AccountId::new("a"), "p@x.com".to_string(), Utc::now());
        let linked = store
            .create_account_with_children(&account, &[orphan.id, taken.id])
            .await
            .unwrap();

        assert_eq!(linked, 1);
        assert_eq!(store.link_batches(), 1);
        assert_eq!(store.children_of(&account.id).await.unwrap().len(), 1);
        assert!(store.orphaned_children("p@x.com").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_with_children_writes_nothing_on_conflict() {
        let store = MockDocumentStore::new();
        let orphan = child("p@x.com", Some("ABC123"));
        store.create_child_record(&orphan).await.unwrap();

        let account = Account::new_parent(AccountId::new("a"), "p@x.com".to_string(), Utc::now());
        store.create_account(&account).await.unwrap();

        let result = store.create_account_with_children(&account, &[orphan.id]).await;
        assert_eq!(result, Err(StoreError::AlreadyExists));
        assert_eq!(store.unregistered_children_for_code("ABC123").await.unwrap().len(), 1);
        assert_eq!(store.link_batches(), 0);
    }

    #[tokio::test]
    async fn test_redeem_stops_at_zero() {
        let store = MockDocumentStore::new();
        let now = Utc::now();
        store
            .create_access_code(&AccessCode {
                code: "ABC123".to_string(),
                uses_left: 1,
                expires_at: now + Duration::days(1),
                used_by: Vec::new(),
                created_by: None,
                created_at: now,
            })
            .await
            .unwrap();

        let redemption = Redemption {
            account_id: AccountId::new("a"),
            email: "p@x.com".to_string(),
            used_at: now,
        };

        assert!(matches!(
            store.redeem_access_code("ABC123", &redemption).await.unwrap(),
            CodeRedemption::Redeemed(ref code) if code.uses_left == 0
        ));
        assert_eq!(
            store.redeem_access_code("ABC123", &redemption).await.unwrap(),
            CodeRedemption::Rejected(AccessCodeRejection::Exhausted)
        );
    }

    async fn open_code(store: &MockDocumentStore, uses_left: u32) {
        let now = Utc::now();
        store
            .create_access_code(&AccessCode {
                code: "ABC123".to_string(),
                uses_left,
                expires_at: now + Duration::days(1),
                used_by: Vec::new(),
                created_by: None,
                created_at: now,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_with_code_redeems_and_links_together() {
        let store = MockDocumentStore::new();
        open_code(&store, 2).await;
        let orphan = child("p@x.com", Some("ABC123"));
        store.create_child_record(&orphan).await.unwrap();

        let account = Account::new_parent(AccountId::new("a"), "p@x.com".to_string(), Utc::now());
        let redemption = Redemption {
            account_id: account.id.clone(),
            email: account.email.clone(),
            used_at: Utc::now(),
        };
        let outcome = store
            .create_account_with_code(&account, &[orphan.id], "ABC123", &redemption)
            .await
            .unwrap();

        assert!(matches!(outcome, CodeRegistration::Created { ref code, linked: 1 } if code.uses_left == 1));
        assert_eq!(store.account_count(), 1);
        assert_eq!(store.children_of(&account.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_with_code_keeps_code_when_email_taken() {
        let store = MockDocumentStore::new();
        open_code(&store, 1).await;
        store.put_account(Account::new_parent(AccountId::new("stale"), "a@x.com".to_string(), Utc::now()));

        let account = Account::new_parent(AccountId::new("a"), "a@x.com".to_string(), Utc::now());
        let redemption = Redemption {
            account_id: account.id.clone(),
            email: account.email.clone(),
            used_at: Utc::now(),
        };
        let result = store.create_account_with_code(&account, &[], "ABC123", &redemption).await;

        assert_eq!(result, Err(StoreError::AlreadyExists));
        let record = store.get_access_code("ABC123").await.unwrap().unwrap();
        assert_eq!(record.uses_left, 1);
        assert!(record.used_by.is_empty());
    }

    #[tokio::test]
    async fn test_create_with_exhausted_code_writes_no_account() {
        let store = MockDocumentStore::new();
        open_code(&store, 0).await;

        let account = Account::new_parent(AccountId::new("a"), "p@x.com".to_string(), Utc::now());
        let redemption = Redemption {
            account_id: account.id.clone(),
            email: account.email.clone(),
            used_at: Utc::now(),
        };
        let outcome = store
            .create_account_with_code(&account, &[], "ABC123", &redemption)
            .await
            .unwrap();

        assert_eq!(outcome, CodeRegistration::Rejected(AccessCodeRejection::Exhausted));
        assert_eq!(store.account_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MockDocumentStore::new();
        store.set_unavailable(true);

        assert!(matches!(
            store.get_account(&AccountId::new("a")).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(store.admin_setup().await, Err(StoreError::Unavailable(_))));
    }
}

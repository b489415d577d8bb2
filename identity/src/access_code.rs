//! Access code validation, consumption and issuing.
//!
//! Access codes gate parent self-registration. A code is valid iff it
//! exists, has `uses_left > 0` and has not expired.
//!
//! # Consumption
//!
//! Validation is a plain read and only serves to fail fast. Consumption is
//! delegated to [`DocumentStore::redeem_access_code`], which re-checks
//! validity and decrements inside one transaction:
//!
//! ```text
//! validate()  ── read ──▶  fail fast before any provider principal exists
//! consume()   ── txn  ──▶  check + decrement + append, or reject
//! ```
//!
//! Registration goes through [`AccessCodeValidator::consume_for_account`],
//! which writes the account and redeems the code in the same transaction.
//!
//! Two registrations racing for the last use therefore cannot both succeed.

use crate::config::IdentityConfig;
use crate::environment::Clock;
use crate::error::{AuthError, Result, StoreError};
use crate::metrics;
use crate::providers::{AccessCode, Account, CodeRedemption, CodeRegistration, DocumentStore, Redemption};
use crate::state::{AccountId, ChildId};
use crate::utils::{generate_access_code, normalize_access_code};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an access code cannot be redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessCodeRejection {
    /// Empty or whitespace-only input.
    Malformed,
    /// No such code.
    NotFound,
    /// `uses_left == 0`.
    Exhausted,
    /// `expires_at` has passed.
    Expired,
}

impl fmt::Display for AccessCodeRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Malformed => "code is empty",
            Self::NotFound => "code does not exist",
            Self::Exhausted => "code has no uses left",
            Self::Expired => "code has expired",
        })
    }
}

/// Result of [`AccessCodeValidator::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validation {
    /// Whether the code can be redeemed right now.
    pub valid: bool,

    /// Why not, when `valid` is false.
    pub reason: Option<AccessCodeRejection>,
}

impl Validation {
    const fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    const fn rejected(reason: AccessCodeRejection) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }

    /// Convert into a `Result`, failing with `ExpiredOrExhaustedAccessCode`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::ExpiredOrExhaustedAccessCode` if the code is invalid.
    pub const fn into_result(self) -> Result<()> {
        match self.reason {
            Some(reason) => Err(AuthError::ExpiredOrExhaustedAccessCode { reason }),
            None => Ok(()),
        }
    }
}

/// Admin request for a new access code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    /// Number of registrations the code allows.
    pub uses: u32,

    /// Expiry timestamp.
    pub expires_at: DateTime<Utc>,

    /// Issuing admin.
    pub issued_by: Option<AccountId>,

    /// Explicit code; generated when `None`.
    pub code: Option<String>,
}

/// Access code validator.
///
/// Borrows the store and clock from the identity environment.
#[derive(Debug)]
pub struct AccessCodeValidator<'a, D, C> {
    store: &'a D,
    clock: &'a C,
}

impl<'a, D, C> AccessCodeValidator<'a, D, C>
where
    D: DocumentStore,
    C: Clock,
{
    /// Create a validator over the given store and clock.
    #[must_use]
    pub const fn new(store: &'a D, clock: &'a C) -> Self {
        Self { store, clock }
    }

    /// Check whether a code can be redeemed right now.
    ///
    /// # Errors
    ///
    /// Returns error only if the store cannot be read.
    pub async fn validate(&self, code: &str) -> Result<Validation> {
        let code = normalize_access_code(code);
        if code.is_empty() {
            return Ok(Validation::rejected(AccessCodeRejection::Malformed));
        }

        let Some(record) = self.store.get_access_code(&code).await? else {
            return Ok(Validation::rejected(AccessCodeRejection::NotFound));
        };

        Ok(record
            .rejection(self.clock.now())
            .map_or_else(Validation::ok, Validation::rejected))
    }

    /// Atomically consume one use of a code on behalf of an account.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The code is invalid at consumption time → `AuthError::ExpiredOrExhaustedAccessCode`
    /// - The store transaction fails
    pub async fn consume(&self, code: &str, account_id: &AccountId, email: &str) -> Result<AccessCode> {
        let code = normalize_access_code(code);
        if code.is_empty() {
            return Err(AuthError::ExpiredOrExhaustedAccessCode {
                reason: AccessCodeRejection::Malformed,
            });
        }

        let redemption = Redemption {
            account_id: account_id.clone(),
            email: email.to_string(),
            used_at: self.clock.now(),
        };

        match self.store.redeem_access_code(&code, &redemption).await? {
            CodeRedemption::Redeemed(record) => {
                consumed(&record, account_id);
                Ok(record)
            }
            CodeRedemption::Rejected(reason) => Err(rejected(&code, reason)),
        }
    }

    /// Consume one use of a code and create the redeeming account, linking
    /// `children`, in one store transaction.
    ///
    /// Nothing is written unless every step succeeds, so a failed
    /// registration never burns a code use.
    ///
    /// Returns the number of child records linked.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The code is invalid at consumption time → `AuthError::ExpiredOrExhaustedAccessCode`
    /// - The account id or e-mail already has a document → `AuthError::EmailAlreadyInUse`
    /// - The store transaction fails
    pub async fn consume_for_account(&self, code: &str, account: &Account, children: &[ChildId]) -> Result<usize> {
        let code = normalize_access_code(code);
        if code.is_empty() {
            return Err(AuthError::ExpiredOrExhaustedAccessCode {
                reason: AccessCodeRejection::Malformed,
            });
        }

        let redemption = Redemption {
            account_id: account.id.clone(),
            email: account.email.clone(),
            used_at: self.clock.now(),
        };

        match self
            .store
            .create_account_with_code(account, children, &code, &redemption)
            .await
        {
            Ok(CodeRegistration::Created { code: record, linked }) => {
                consumed(&record, &account.id);
                Ok(linked)
            }
            Ok(CodeRegistration::Rejected(reason)) => Err(rejected(&code, reason)),
            Err(StoreError::AlreadyExists) => {
                tracing::warn!(account_id = %account.id, "Account document already exists");
                Err(AuthError::EmailAlreadyInUse)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Issue a new access code (admin action).
    ///
    /// Generated codes that collide with an existing one are retried up to
    /// `config.access_code_issue_attempts` times.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `uses` is zero or `expires_at` is not in the future → `AuthError::ExpiredOrExhaustedAccessCode`
    /// - An explicit code already exists → `AuthError::ConcurrentModification`
    /// - Every generated candidate collided
    /// - The store cannot be written
    pub async fn issue(&self, request: IssueRequest, config: &IdentityConfig) -> Result<AccessCode> {
        if request.uses == 0 {
            return Err(AuthError::ExpiredOrExhaustedAccessCode {
                reason: AccessCodeRejection::Exhausted,
            });
        }
        if request.expires_at <= self.clock.now() {
            return Err(AuthError::ExpiredOrExhaustedAccessCode {
                reason: AccessCodeRejection::Expired,
            });
        }

        let attempts = if request.code.is_some() {
            1
        } else {
            config.access_code_issue_attempts.max(1)
        };

        for attempt in 1..=attempts {
            let code = candidate_code(request.code.as_deref(), config.access_code_length);
            if code.is_empty() {
                return Err(AuthError::ExpiredOrExhaustedAccessCode {
                    reason: AccessCodeRejection::Malformed,
                });
            }

            let record = AccessCode {
                code,
                uses_left: request.uses,
                expires_at: request.expires_at,
                used_by: Vec::new(),
                created_by: request.issued_by.clone(),
                created_at: self.clock.now(),
            };

            match self.store.create_access_code(&record).await {
                Ok(()) => {
                    tracing::info!(code = %record.code, uses = record.uses_left, "Access code issued");
                    return Ok(record);
                }
                Err(StoreError::AlreadyExists) => {
                    tracing::debug!(attempt, "Access code collision, retrying");
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(AuthError::ConcurrentModification)
    }
}

fn consumed(record: &AccessCode, account_id: &AccountId) {
    tracing::info!(
        code = %record.code,
        account_id = %account_id,
        uses_left = record.uses_left,
        "Access code consumed"
    );
    metrics::counter!(metrics::ACCESS_CODE_CONSUMED_TOTAL).increment(1);
}

fn rejected(code: &str, reason: AccessCodeRejection) -> AuthError {
    tracing::warn!(code, %reason, "Access code rejected at consumption");
    AuthError::ExpiredOrExhaustedAccessCode { reason }
}

fn candidate_code(explicit: Option<&str>, length: usize) -> String {
    explicit.map_or_else(
        || generate_access_code(&mut rand::thread_rng(), length),
        normalize_access_code,
    )
}

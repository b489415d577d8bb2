//! Compensating actions for multi-step flows.
//!
//! Registration, federated sign-in and admin bootstrap touch the identity
//! provider and the document store, which share no transaction. When a
//! later step fails, earlier effects are undone here so no principal is
//! left without an account.
//!
//! Compensation never fails the caller: the original error is what gets
//! reported. Failures are logged at `error` and counted.

use crate::metrics;
use crate::providers::{DocumentStore, IdentityProvider};
use crate::state::AccountId;

/// An undo step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    /// Delete the current provider principal, falling back to sign-out.
    DeletePrincipal,

    /// Sign the current principal out.
    SignOut,

    /// Delete an account document.
    DeleteAccount(AccountId),
}

impl Compensation {
    const fn label(&self) -> &'static str {
        match self {
            Self::DeletePrincipal => "delete_principal",
            Self::SignOut => "sign_out",
            Self::DeleteAccount(_) => "delete_account",
        }
    }

    /// Run the step.
    ///
    /// Returns `true` if the undo fully succeeded.
    pub async fn run<P, D>(&self, provider: &P, store: &D) -> bool
    where
        P: IdentityProvider,
        D: DocumentStore,
    {
        metrics::counter!(metrics::COMPENSATION_TOTAL, "action" => self.label()).increment(1);

        match self {
            Self::DeletePrincipal => match provider.delete_current_principal().await {
                Ok(()) => {
                    tracing::info!("Compensation: principal deleted");
                    true
                }
                Err(error) => {
                    tracing::error!(%error, "Compensation: principal delete failed, signing out");
                    if let Err(error) = provider.sign_out().await {
                        tracing::error!(%error, "Compensation: sign-out fallback failed");
                    }
                    false
                }
            },
            Self::SignOut => match provider.sign_out().await {
                Ok(()) => true,
                Err(error) => {
                    tracing::error!(%error, "Compensation: sign-out failed");
                    false
                }
            },
            Self::DeleteAccount(id) => match store.delete_account(id).await {
                Ok(()) => {
                    tracing::info!(account_id = %id, "Compensation: account deleted");
                    true
                }
                Err(error) => {
                    tracing::error!(account_id = %id, %error, "Compensation: account delete failed");
                    false
                }
            },
        }
    }
}

/// Run undo steps in order.
///
/// Returns `true` if every step succeeded.
pub async fn compensate<P, D>(steps: &[Compensation], provider: &P, store: &D) -> bool
where
    P: IdentityProvider,
    D: DocumentStore,
{
    let mut clean = true;
    for step in steps {
        clean &= step.run(provider, store).await;
    }
    clean
}

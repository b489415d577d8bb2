//! Session state machine.
//!
//! Pure transition function over [`SessionSnapshot`]:
//! `(Snapshot, SessionAction) → Snapshot`.
//!
//! The session manager performs all I/O and feeds the outcome in as an
//! action; the reducer alone decides what the observable value becomes.
//!
//! ```text
//!                    ┌──────── TransitionStarted (loading) ───────┐
//!                    ▼                                            │
//! SignedOut ──Established──▶ Active{role} ──SignedOut/Lost──▶ SignedOut
//!     │                                                       ▲
//!     ├──VerificationRequired──▶ PendingVerification ─────────┤
//!     └──Rejected──────────────▶ Blocked{reason} ─────────────┘
//! ```
//!
//! `user` and `role` are only ever populated together with `Active`.

use crate::providers::Account;
use crate::state::{Rejection, SessionPhase, SessionSnapshot};

/// Inputs to the session state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// A transition began; the value is loading until it settles.
    TransitionStarted,

    /// An account was authorized for the current principal.
    Established(Account),

    /// The signed-in account document changed.
    AccountUpdated(Account),

    /// The principal must verify its e-mail; the provider session was signed out.
    VerificationRequired {
        /// Address awaiting verification.
        email: String,
    },

    /// The attempt was refused; the provider session was signed out.
    Rejected(Rejection),

    /// Explicit sign-out.
    SignedOut,

    /// The transition ended; clears `loading` without changing the phase.
    TransitionFinished,

    /// The provider reported no principal.
    PrincipalLost,
}

/// Session reducer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionReducer;

impl SessionReducer {
    /// Create a new session reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Apply an action to the snapshot.
    ///
    /// Returns `true` if the snapshot changed.
    pub fn reduce(&self, state: &mut SessionSnapshot, action: SessionAction) -> bool {
        let before = state.clone();

        match action {
            SessionAction::TransitionStarted => {
                state.loading = true;
            }

            SessionAction::Established(account) => {
                *state = SessionSnapshot {
                    role: Some(account.role),
                    phase: SessionPhase::Active { role: account.role },
                    user: Some(account),
                    loading: false,
                };
            }

            SessionAction::AccountUpdated(account) => {
                // Only refresh the live session, and only with its own account.
                if state.account_id() == Some(&account.id) {
                    state.role = Some(account.role);
                    state.phase = SessionPhase::Active { role: account.role };
                    state.user = Some(account);
                }
            }

            SessionAction::VerificationRequired { email } => {
                *state = signed_out(SessionPhase::PendingVerification { email });
            }

            SessionAction::Rejected(reason) => {
                *state = signed_out(SessionPhase::Blocked { reason });
            }

            SessionAction::SignedOut => {
                *state = signed_out(SessionPhase::SignedOut);
            }

            SessionAction::TransitionFinished => {
                state.loading = false;
            }

            SessionAction::PrincipalLost => {
                // Pending verification and blocked attempts already signed the
                // provider out; keep telling the UI why.
                let phase = match &state.phase {
                    SessionPhase::Active { .. } => SessionPhase::SignedOut,
                    other => other.clone(),
                };
                *state = signed_out(phase);
            }
        }

        *state != before
    }
}

const fn signed_out(phase: SessionPhase) -> SessionSnapshot {
    SessionSnapshot {
        user: None,
        role: None,
        loading: false,
        phase,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AccountId, Role};
    use chrono::Utc;

    fn account(id: &str) -> Account {
        Account::new_parent(AccountId::new(id), format!("{id}@x.com"), Utc::now())
    }

    #[test]
    fn test_initial_snapshot_is_loading() {
        let snapshot = SessionSnapshot::default();
        assert!(snapshot.loading);
        assert!(snapshot.phase.is_signed_out());
    }

    #[test]
    fn test_established_sets_user_and_role_together() {
        let reducer = SessionReducer::new();
        let mut state = SessionSnapshot::default();

        assert!(reducer.reduce(&mut state, SessionAction::Established(account("a"))));

        assert!(!state.loading);
        assert_eq!(state.role, Some(Role::Parent));
        assert_eq!(state.phase, SessionPhase::Active { role: Role::Parent });
        assert_eq!(state.account_id(), Some(&AccountId::new("a")));
    }

    #[test]
    fn test_rejection_clears_session() {
        let reducer = SessionReducer::new();
        let mut state = SessionSnapshot::default();
        reducer.reduce(&mut state, SessionAction::Established(account("a")));

        reducer.reduce(
            &mut state,
            SessionAction::Rejected(Rejection::RoleMismatch { actual: Role::Parent }),
        );

        assert!(state.user.is_none());
        assert!(state.role.is_none());
        assert!(matches!(state.phase, SessionPhase::Blocked { .. }));
    }

    #[test]
    fn test_principal_lost_keeps_pending_verification() {
        let reducer = SessionReducer::new();
        let mut state = SessionSnapshot::default();
        reducer.reduce(
            &mut state,
            SessionAction::VerificationRequired {
                email: "a@x.com".to_string(),
            },
        );

        reducer.reduce(&mut state, SessionAction::PrincipalLost);
        assert_eq!(
            state.phase,
            SessionPhase::PendingVerification {
                email: "a@x.com".to_string()
            }
        );
    }

    #[test]
    fn test_principal_lost_ends_active_session() {
        let reducer = SessionReducer::new();
        let mut state = SessionSnapshot::default();
        reducer.reduce(&mut state, SessionAction::Established(account("a")));

        reducer.reduce(&mut state, SessionAction::PrincipalLost);
        assert_eq!(state.phase, SessionPhase::SignedOut);
        assert!(state.user.is_none());
    }

    #[test]
    fn test_account_update_ignores_other_accounts() {
        let reducer = SessionReducer::new();
        let mut state = SessionSnapshot::default();
        reducer.reduce(&mut state, SessionAction::Established(account("a")));

        let mut other = account("b");
        other.role = Role::Admin;
        assert!(!reducer.reduce(&mut state, SessionAction::AccountUpdated(other)));
        assert_eq!(state.role, Some(Role::Parent));
    }

    #[test]
    fn test_finished_transition_keeps_phase() {
        let reducer = SessionReducer::new();
        let mut state = SessionSnapshot::default();
        reducer.reduce(&mut state, SessionAction::Established(account("a")));
        reducer.reduce(&mut state, SessionAction::TransitionStarted);
        assert!(state.loading);

        reducer.reduce(&mut state, SessionAction::TransitionFinished);
        assert!(!state.loading);
        assert_eq!(state.phase, SessionPhase::Active { role: Role::Parent });
    }
}

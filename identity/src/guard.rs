//! Route guard.
//!
//! Decides what a protected route should do with the current session. The
//! guard is handed a session receiver by the application; it never reaches
//! for a global.

use crate::config::DashboardRoutes;
use crate::state::{Role, SessionSnapshot};
use tokio::sync::watch;

/// What a protected route should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// The session is still resolving; render a placeholder.
    Loading,

    /// Render the route.
    Allow,

    /// Not signed in.
    RedirectToLogin {
        /// Login route.
        path: String,
    },

    /// Signed in with another role than the route requires.
    RedirectToDashboard {
        /// The session's role.
        role: Role,
        /// Dashboard root for that role.
        path: String,
    },
}

/// Pure guard decision for a snapshot.
///
/// `required` is `None` for routes open to every signed-in role.
///
/// # Examples
///
/// ```
/// use daycare_identity::config::DashboardRoutes;
/// use daycare_identity::guard::{decide, GuardDecision};
/// use daycare_identity::{Role, SessionSnapshot};
///
/// let routes = DashboardRoutes::default();
/// assert_eq!(decide(&SessionSnapshot::default(), Some(Role::Parent), &routes), GuardDecision::Loading);
/// ```
#[must_use]
pub fn decide(snapshot: &SessionSnapshot, required: Option<Role>, routes: &DashboardRoutes) -> GuardDecision {
    if snapshot.loading {
        return GuardDecision::Loading;
    }

    let Some(role) = snapshot.phase.role() else {
        return GuardDecision::RedirectToLogin {
            path: routes.login.clone(),
        };
    };

    match required {
        Some(required) if required != role => GuardDecision::RedirectToDashboard {
            role,
            path: routes.root_for(role).to_string(),
        },
        _ => GuardDecision::Allow,
    }
}

/// Route guard bound to a session receiver.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    session: watch::Receiver<SessionSnapshot>,
    routes: DashboardRoutes,
}

impl RouteGuard {
    /// Create a guard over a session receiver.
    #[must_use]
    pub const fn new(session: watch::Receiver<SessionSnapshot>, routes: DashboardRoutes) -> Self {
        Self { session, routes }
    }

    /// Decide for the latest snapshot.
    #[must_use]
    pub fn check(&self, required: Option<Role>) -> GuardDecision {
        decide(&self.session.borrow(), required, &self.routes)
    }

    /// Wait until the session stops loading, then decide.
    ///
    /// Returns `RedirectToLogin` if the session manager is gone.
    pub async fn resolve(&mut self, required: Option<Role>) -> GuardDecision {
        match self.session.wait_for(|snapshot| !snapshot.loading).await {
            Ok(snapshot) => decide(&snapshot, required, &self.routes),
            Err(_) => GuardDecision::RedirectToLogin {
                path: self.routes.login.clone(),
            },
        }
    }
}

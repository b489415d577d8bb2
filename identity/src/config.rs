//! Identity configuration.
//!
//! Configuration values are provided by the host application (they
//! deserialize from whatever configuration source it uses), not hardcoded.

use crate::constants::PROVIDER_MIN_PASSWORD_LENGTH;
use crate::state::Role;
use serde::{Deserialize, Serialize};

/// Route roots used by the route guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardRoutes {
    /// Login page.
    pub login: String,

    /// Admin dashboard root.
    pub admin: String,

    /// Parent dashboard root.
    pub parent: String,
}

impl DashboardRoutes {
    /// Dashboard root for a role.
    #[must_use]
    pub fn root_for(&self, role: Role) -> &str {
        match role {
            Role::Admin => &self.admin,
            Role::Parent => &self.parent,
        }
    }
}

impl Default for DashboardRoutes {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            admin: "/admin".to_string(),
            parent: "/parent".to_string(),
        }
    }
}

/// Session manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Refuse password sessions whose e-mail is unverified.
    ///
    /// Default: true
    pub require_verified_email: bool,

    /// Minimum password length checked before calling the provider.
    ///
    /// Default: 6 (the provider's own minimum)
    pub min_password_length: usize,

    /// Recreate accounts from orphaned child records.
    ///
    /// Default: true
    pub reconcile_orphans: bool,

    /// Length of generated access codes.
    ///
    /// Default: 8
    pub access_code_length: usize,

    /// How many random codes to try before giving up on a collision.
    ///
    /// Default: 5
    pub access_code_issue_attempts: u32,

    /// Route roots for the route guard.
    pub dashboards: DashboardRoutes,
}

impl IdentityConfig {
    /// Create configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require verified e-mail addresses for password sign-in.
    #[must_use]
    pub const fn with_verified_email_required(mut self, required: bool) -> Self {
        self.require_verified_email = required;
        self
    }

    /// Set the minimum password length (never below the provider's own).
    #[must_use]
    pub const fn with_min_password_length(mut self, length: usize) -> Self {
        self.min_password_length = if length < PROVIDER_MIN_PASSWORD_LENGTH {
            PROVIDER_MIN_PASSWORD_LENGTH
        } else {
            length
        };
        self
    }

    /// Enable or disable orphan reconciliation.
    #[must_use]
    pub const fn with_orphan_reconciliation(mut self, enabled: bool) -> Self {
        self.reconcile_orphans = enabled;
        self
    }

    /// Set the generated access code length.
    #[must_use]
    pub const fn with_access_code_length(mut self, length: usize) -> Self {
        self.access_code_length = length;
        self
    }

    /// Set the dashboard routes.
    #[must_use]
    pub fn with_dashboards(mut self, dashboards: DashboardRoutes) -> Self {
        self.dashboards = dashboards;
        self
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            require_verified_email: true,
            min_password_length: PROVIDER_MIN_PASSWORD_LENGTH,
            reconcile_orphans: true,
            access_code_length: 8,
            access_code_issue_attempts: 5,
            dashboards: DashboardRoutes::default(),
        }
    }
}

//! Identity environment.
//!
//! This module defines the environment type for dependency injection
//! into the session manager, plus the clock abstraction.

use crate::providers::{DocumentStore, IdentityProvider};
use chrono::{DateTime, Utc};

/// Clock trait - abstracts time for testability.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Identity environment.
///
/// Contains all external dependencies needed by the session manager.
///
/// # Type Parameters
///
/// - `P`: Identity provider client
/// - `D`: Document store
/// - `C`: Clock
#[derive(Clone)]
pub struct IdentityEnvironment<P, D, C = SystemClock>
where
    P: IdentityProvider,
    D: DocumentStore,
    C: Clock,
{
    /// Identity provider client.
    pub provider: P,

    /// Document store.
    pub store: D,

    /// Clock.
    pub clock: C,
}

impl<P, D> IdentityEnvironment<P, D, SystemClock>
where
    P: IdentityProvider,
    D: DocumentStore,
{
    /// Create an environment using the wall clock.
    #[must_use]
    pub const fn new(provider: P, store: D) -> Self {
        Self {
            provider,
            store,
            clock: SystemClock,
        }
    }
}

impl<P, D, C> IdentityEnvironment<P, D, C>
where
    P: IdentityProvider,
    D: DocumentStore,
    C: Clock,
{
    /// Create an environment with a custom clock.
    #[must_use]
    pub const fn with_clock(provider: P, store: D, clock: C) -> Self {
        Self {
            provider,
            store,
            clock,
        }
    }
}

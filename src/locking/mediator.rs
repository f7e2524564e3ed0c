//! In-process lock mediation.
//!
//! Before writing a claim to the store, a locker asks the process-local
//! [`LocalLockMediator`] for the target. If another live transaction in this
//! process already holds it, there is no point paying for a store round trip
//! that will lose anyway. The mediator is advisory and never blocks: a denied
//! caller gets `false` immediately.
//!
//! Entries are sharded per key, so contention on one target never serializes
//! unrelated targets.

use crate::core::time::{Timestamp, TimestampProvider};
use crate::locking::claim::KeyColumn;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct LocalClaim<T> {
    holder: T,
    expires: Timestamp,
}

/// Process-local registry of exclusive claims on targets.
pub struct LocalLockMediator<T> {
    name: String,
    times: Arc<dyn TimestampProvider>,
    claims: DashMap<KeyColumn, LocalClaim<T>>,
}

impl<T> LocalLockMediator<T>
where
    T: Clone + Eq + Debug + Send + Sync,
{
    pub fn new(name: impl Into<String>, times: Arc<dyn TimestampProvider>) -> Self {
        Self {
            name: name.into(),
            times,
            claims: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Claim `target` for `requester` for the next `expiration`.
    ///
    /// Succeeds when the target is unclaimed, already claimed by `requester`
    /// (the expiry is refreshed), or claimed by someone whose claim has
    /// expired. Returns false when another live holder exists.
    pub fn lock(&self, target: &KeyColumn, requester: &T, expiration: Duration) -> bool {
        let now = self.times.now();
        let claim = LocalClaim {
            holder: requester.clone(),
            expires: now.plus(expiration),
        };

        match self.claims.entry(target.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(claim);
                tracing::trace!(mediator = %self.name, kc = %target, ?requester, "local lock acquired");
                true
            }
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if current.holder == *requester {
                    occupied.insert(claim);
                    true
                } else if !now.is_before(current.expires) {
                    tracing::debug!(
                        mediator = %self.name,
                        kc = %target,
                        previous = ?current.holder,
                        expired_at = %current.expires,
                        ?requester,
                        "replacing expired local lock"
                    );
                    occupied.insert(claim);
                    true
                } else {
                    tracing::trace!(
                        mediator = %self.name,
                        kc = %target,
                        holder = ?current.holder,
                        ?requester,
                        "local lock contended"
                    );
                    false
                }
            }
        }
    }

    /// Release `target` if `requester` holds it. Returns whether anything was
    /// released.
    pub fn unlock(&self, target: &KeyColumn, requester: &T) -> bool {
        let removed = self
            .claims
            .remove_if(target, |_, claim| claim.holder == *requester)
            .is_some();
        if !removed {
            tracing::debug!(
                mediator = %self.name,
                kc = %target,
                ?requester,
                "unlock ignored: requester does not hold the local lock"
            );
        }
        removed
    }

    /// Current holder of `target`, if its claim has not expired.
    pub fn holder(&self, target: &KeyColumn) -> Option<T> {
        let now = self.times.now();
        self.claims
            .get(target)
            .filter(|claim| now.is_before(claim.expires))
            .map(|claim| claim.holder.clone())
    }

    /// Number of recorded claims, expired ones included.
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// Named mediators for one process.
///
/// Constructed once and handed to every locker, so lockers guarding the same
/// store share a mediator while lockers for different stores never see each
/// other's targets.
pub struct LocalLockMediators<T> {
    times: Arc<dyn TimestampProvider>,
    mediators: DashMap<String, Arc<LocalLockMediator<T>>>,
}

impl<T> LocalLockMediators<T>
where
    T: Clone + Eq + Debug + Send + Sync,
{
    pub fn new(times: Arc<dyn TimestampProvider>) -> Self {
        Self {
            times,
            mediators: DashMap::new(),
        }
    }

    /// Get or create the mediator named `name`.
    pub fn get(&self, name: &str) -> Arc<LocalLockMediator<T>> {
        self.mediators
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LocalLockMediator::new(name, self.times.clone())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.mediators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mediators.is_empty()
    }
}

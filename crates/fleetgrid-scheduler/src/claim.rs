//! In-process claimed-entity sets.
//!
//! A row is worked on by at most one task invocation of this process at a
//! time. Each entity kind has a [`ClaimGuard`] holding the IDs currently
//! claimed; selecting a batch and inserting its IDs happen under one lock,
//! with the already-claimed IDs passed to the store's claim query as the
//! exclusion list. Across processes, the store's serialized claim
//! transaction provides the same skip-what-others-hold behavior.
//!
//! The returned [`Claim`] releases its IDs when dropped, whichever way the
//! task exits. The lock is never held across an `.await`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

#[derive(Clone)]
pub struct ClaimGuard {
    kind: &'static str,
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl ClaimGuard {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            claimed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Select and claim a batch.
    ///
    /// `select` receives the IDs already claimed and returns the IDs to
    /// claim; it runs while the set is locked, so it must not block on
    /// anything but the store.
    pub fn acquire_batch<E, F>(&self, select: F) -> Result<Claim, E>
    where
        F: FnOnce(&HashSet<String>) -> Result<Vec<String>, E>,
    {
        let mut claimed = lock(&self.claimed);
        let ids = select(&claimed)?;
        let ids: Vec<String> = ids.into_iter().filter(|id| claimed.insert(id.clone())).collect();
        drop(claimed);

        if !ids.is_empty() {
            debug!(kind = self.kind, count = ids.len(), "claimed batch");
        }
        Ok(Claim {
            ids,
            claimed: Arc::clone(&self.claimed),
        })
    }

    pub fn is_claimed(&self, id: &str) -> bool {
        lock(&self.claimed).contains(id)
    }

    /// Number of IDs currently claimed.
    pub fn len(&self) -> usize {
        lock(&self.claimed).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// IDs claimed by one task invocation. Released on drop.
#[must_use = "dropping a claim releases it immediately"]
pub struct Claim {
    ids: Vec<String>,
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl Claim {
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Move `id` into a claim of its own, which keeps it claimed after this
    /// one is dropped.
    pub fn split_off(&mut self, id: &str) -> Option<Claim> {
        let pos = self.ids.iter().position(|claimed| claimed == id)?;
        let id = self.ids.swap_remove(pos);
        Some(Claim {
            ids: vec![id],
            claimed: Arc::clone(&self.claimed),
        })
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        let mut claimed = lock(&self.claimed);
        for id in &self.ids {
            claimed.remove(id);
        }
    }
}

/// A panic while the set was locked cannot leave it inconsistent: every
/// critical section is a plain insert or remove.
fn lock(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

// Suspend-scoped cache
//
// Values computed from debuggee state are only reusable while the VM stays
// suspended. The scope is Active after a VM-wide suspend with no resume-class
// command outstanding, and Invalid otherwise. Every transition bumps the epoch;
// a computation only gets stored if the epoch it started in is still current.
//
// This state lives inside the connection's coarse lock. Methods that drop
// cached values hand them back to the caller instead, since a value may own
// remote handles whose reclamation takes that same lock.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

pub(crate) type CachedValue = Arc<dyn Any + Send + Sync>;

/// Values removed from the cache, to be dropped once the state lock is released
#[must_use = "evicted values must be dropped outside the state lock"]
pub(crate) struct Evicted(Vec<CachedValue>);

impl Evicted {
    fn none() -> Self {
        Evicted(Vec::new())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Active,
    Invalid,
}

/// Captured at lookup time and presented again when storing
#[derive(Debug, Clone, Copy)]
pub(crate) struct CacheTicket {
    epoch: u64,
    storable: bool,
}

pub(crate) enum Lookup<T> {
    Hit(T),
    Miss(CacheTicket),
}

pub(crate) struct SuspendScope {
    state: ScopeState,
    epoch: u64,
    pending_resumes: HashSet<u32>,
    values: HashMap<String, CachedValue>,
}

impl Default for SuspendScope {
    fn default() -> Self {
        Self {
            state: ScopeState::Invalid,
            epoch: 0,
            pending_resumes: HashSet::new(),
            values: HashMap::new(),
        }
    }
}

impl SuspendScope {
    pub(crate) fn state(&self) -> ScopeState {
        self.state
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn pending_resumes(&self) -> usize {
        self.pending_resumes.len()
    }

    /// The debuggee reported a VM-wide suspend.
    ///
    /// Ignored while a resume-class command is still outstanding: the VM may
    /// already be running again by the time its reply shows up.
    pub(crate) fn notify_suspend(&mut self) -> bool {
        if self.state == ScopeState::Active {
            return true;
        }
        if !self.pending_resumes.is_empty() {
            trace!(
                "Suspend ignored, {} resume command(s) in flight",
                self.pending_resumes.len()
            );
            return false;
        }

        self.state = ScopeState::Active;
        self.epoch += 1;
        trace!("Suspend scope active, epoch={}", self.epoch);
        true
    }

    /// A resume-class command with packet `id` is being issued
    pub(crate) fn resume_issued(&mut self, id: u32) -> Evicted {
        self.pending_resumes.insert(id);
        // The debuggee may run even if the scope was already invalid
        self.bump_invalid()
    }

    /// Reply for packet `id` was processed
    pub(crate) fn command_complete(&mut self, id: u32) {
        self.pending_resumes.remove(&id);
    }

    pub(crate) fn invalidate(&mut self) -> Evicted {
        if self.state == ScopeState::Invalid && self.values.is_empty() {
            return Evicted::none();
        }
        self.bump_invalid()
    }

    fn bump_invalid(&mut self) -> Evicted {
        self.state = ScopeState::Invalid;
        self.epoch += 1;
        trace!("Suspend scope invalidated, epoch={}", self.epoch);
        Evicted(self.values.drain().map(|(_, value)| value).collect())
    }

    /// Connection is gone: no resume will ever be acknowledged
    pub(crate) fn shutdown(&mut self) -> Evicted {
        self.pending_resumes.clear();
        self.invalidate()
    }

    pub(crate) fn lookup<T>(&self, key: &str) -> Lookup<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.state == ScopeState::Active {
            if let Some(value) = self.values.get(key).and_then(|v| v.downcast_ref::<T>()) {
                return Lookup::Hit(value.clone());
            }
        }

        Lookup::Miss(CacheTicket {
            epoch: self.epoch,
            storable: self.state == ScopeState::Active,
        })
    }

    /// Store a computed value if the scope has not moved since `ticket` was taken.
    /// Returns the value that got replaced, if any.
    pub(crate) fn store(&mut self, key: &str, ticket: CacheTicket, value: CachedValue) -> Evicted {
        if !ticket.storable || ticket.epoch != self.epoch || self.state != ScopeState::Active {
            trace!(
                "Discarding cache value for {} computed in epoch {} (now {})",
                key,
                ticket.epoch,
                self.epoch
            );
            return Evicted(vec![value]);
        }

        match self.values.insert(key.to_string(), value) {
            Some(previous) => Evicted(vec![previous]),
            None => Evicted::none(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }
}

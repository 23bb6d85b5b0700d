// Remote object identity and reclamation
//
// Each remote object id observed by the debugger maps to at most one live
// local handle. The handle counts how many times the id was received from the
// VM; when the last clone of the handle is dropped that count is queued for a
// combined DisposeObjects command.

use crate::types::ObjectId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// Receives handles whose last local reference went away
pub(crate) trait Reclaim: Send + Sync {
    fn reclaim(&self, id: ObjectId, retained: u32);
}

struct HandleInner {
    id: ObjectId,
    retained: AtomicU32,
    owner: Weak<dyn Reclaim>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.reclaim(self.id, self.retained.load(Ordering::Acquire));
        }
    }
}

/// Local lease on a remote object id.
///
/// Clones share one lease. Dropping the last clone schedules disposal of the
/// id on the debuggee.
#[derive(Clone)]
pub struct RemoteHandle {
    inner: Arc<HandleInner>,
}

impl RemoteHandle {
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    /// Number of times the id was handed out by the VM for this lease
    pub fn retain_count(&self) -> u32 {
        self.inner.retained.load(Ordering::Acquire)
    }

    pub fn same_lease(&self, other: &RemoteHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("id", &self.id())
            .field("retained", &self.retain_count())
            .finish()
    }
}

#[derive(Default)]
pub(crate) struct ObjectTable {
    entries: HashMap<ObjectId, Weak<HandleInner>>,
}

impl ObjectTable {
    /// Handle for `id`, creating the entry on first observation.
    /// The null id has no remote object and yields `None`.
    pub(crate) fn acquire(&mut self, id: ObjectId, owner: &Weak<dyn Reclaim>) -> Option<RemoteHandle> {
        if id == 0 {
            return None;
        }

        if let Some(inner) = self.entries.get(&id).and_then(Weak::upgrade) {
            inner.retained.fetch_add(1, Ordering::AcqRel);
            return Some(RemoteHandle { inner });
        }

        let inner = Arc::new(HandleInner {
            id,
            retained: AtomicU32::new(1),
            owner: owner.clone(),
        });
        self.entries.insert(id, Arc::downgrade(&inner));
        Some(RemoteHandle { inner })
    }

    /// Drop the entry for `id` unless a newer live handle has replaced it
    pub(crate) fn forget_if_dead(&mut self, id: ObjectId) -> bool {
        match self.entries.get(&id) {
            Some(entry) if entry.strong_count() == 0 => {
                self.entries.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Reclaimed ids awaiting one combined dispose command
pub(crate) struct DisposeBatch {
    counts: BTreeMap<ObjectId, u32>,
    threshold: usize,
}

impl DisposeBatch {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            counts: BTreeMap::new(),
            threshold,
        }
    }

    /// Queue `count` releases of `id`. Returns true once the batch should be flushed.
    pub(crate) fn push(&mut self, id: ObjectId, count: u32) -> bool {
        let total = self.counts.entry(id).or_insert(0);
        *total = total.saturating_add(count);
        self.counts.len() >= self.threshold
    }

    pub(crate) fn take(&mut self) -> Vec<(ObjectId, u32)> {
        std::mem::take(&mut self.counts).into_iter().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.counts.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        reclaimed: Mutex<Vec<(ObjectId, u32)>>,
    }

    impl Reclaim for Recorder {
        fn reclaim(&self, id: ObjectId, retained: u32) {
            self.reclaimed.lock().push((id, retained));
        }
    }

    fn owner(recorder: &Arc<Recorder>) -> Weak<dyn Reclaim> {
        let weak: Weak<Recorder> = Arc::downgrade(recorder);
        weak
    }

    #[test]
    fn test_same_id_shares_lease() {
        let recorder = Arc::new(Recorder::default());
        let owner = owner(&recorder);
        let mut table = ObjectTable::default();

        let first = table.acquire(0x10, &owner).unwrap();
        let second = table.acquire(0x10, &owner).unwrap();

        assert!(first.same_lease(&second));
        assert_eq!(first.retain_count(), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_null_id_has_no_handle() {
        let recorder = Arc::new(Recorder::default());
        let mut table = ObjectTable::default();
        assert!(table.acquire(0, &owner(&recorder)).is_none());
    }

    #[test]
    fn test_last_drop_reclaims_once_with_count() {
        let recorder = Arc::new(Recorder::default());
        let owner = owner(&recorder);
        let mut table = ObjectTable::default();

        let first = table.acquire(0x20, &owner).unwrap();
        let second = table.acquire(0x20, &owner).unwrap();
        let clone = first.clone();

        drop(first);
        drop(second);
        assert!(recorder.reclaimed.lock().is_empty());

        drop(clone);
        assert_eq!(*recorder.reclaimed.lock(), vec![(0x20, 2)]);

        assert!(table.forget_if_dead(0x20));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_reacquire_after_reclaim_is_new_lease() {
        let recorder = Arc::new(Recorder::default());
        let owner = owner(&recorder);
        let mut table = ObjectTable::default();

        drop(table.acquire(0x30, &owner).unwrap());
        let fresh = table.acquire(0x30, &owner).unwrap();

        // Stale reclamation must not evict the fresh entry
        assert!(!table.forget_if_dead(0x30));
        assert_eq!(fresh.retain_count(), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_batch_sums_counts_per_id() {
        let mut batch = DisposeBatch::new(3);

        assert!(!batch.push(1, 1));
        assert!(!batch.push(2, 4));
        assert!(!batch.push(1, 2));
        assert_eq!(batch.len(), 2);
        assert!(batch.push(3, 1));

        assert_eq!(batch.take(), vec![(1, 3), (2, 4), (3, 1)]);
        assert!(batch.is_empty());
    }
}

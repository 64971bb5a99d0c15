use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use aloft_base::{err, ObjectId, Result, TransactionId};
use parking_lot::{Mutex, RwLock};

use crate::local_object::LocalObject;

/// A process-local, opaque handle naming one shared object. Cheap to
/// clone: all clones refer to the same underlying storage.
#[derive(Clone)]
pub struct ObjectRef(Arc<ObjectInner>);

struct ObjectInner {
    id: ObjectId,
    kind: ObjectKind,
}

enum ObjectKind {
    Versioned(RwLock<VersionedState>),
    Unversioned(Mutex<Box<dyn LocalObject>>),
}

struct VersionedState {
    committed: BTreeMap<TransactionId, Arc<Version>>,
    working: HashMap<TransactionId, Box<dyn LocalObject>>,
}

struct Version {
    state: Box<dyn LocalObject>,
    embedded: Vec<ObjectRef>,
}

impl ObjectRef {
    fn new_versioned(id: ObjectId, initial: Box<dyn LocalObject>) -> Self {
        let mut committed = BTreeMap::new();
        committed.insert(
            TransactionId::MIN,
            Arc::new(Version {
                state: initial,
                embedded: Vec::new(),
            }),
        );
        ObjectRef(Arc::new(ObjectInner {
            id,
            kind: ObjectKind::Versioned(RwLock::new(VersionedState {
                committed,
                working: HashMap::new(),
            })),
        }))
    }

    fn new_unversioned(id: ObjectId, initial: Box<dyn LocalObject>) -> Self {
        ObjectRef(Arc::new(ObjectInner {
            id,
            kind: ObjectKind::Unversioned(Mutex::new(initial)),
        }))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn is_versioned(&self) -> bool {
        matches!(self.0.kind, ObjectKind::Versioned(_))
    }

    /// The committed version visible at `at_tid`: the greatest committed
    /// id no greater than `at_tid`.
    pub fn get_version(&self, at_tid: TransactionId) -> Result<Box<dyn LocalObject>> {
        match &self.0.kind {
            ObjectKind::Versioned(state) => {
                let state = state.read();
                state
                    .committed
                    .range(..=at_tid)
                    .next_back()
                    .map(|(_, v)| v.state.clone_box())
                    .ok_or_else(|| err("no committed version visible at requested transaction id"))
            }
            ObjectKind::Unversioned(_) => Err(err("object is unversioned")),
        }
    }

    /// Forks (or reuses) the working copy for `tid`; the fork's base state
    /// is the version visible at `from_tid` (the transaction's start id).
    pub fn fork(&self, tid: TransactionId, from_tid: TransactionId) -> Result<()> {
        match &self.0.kind {
            ObjectKind::Versioned(state) => {
                let mut state = state.write();
                if state.working.contains_key(&tid) {
                    return Ok(());
                }
                let base = state
                    .committed
                    .range(..=from_tid)
                    .next_back()
                    .map(|(_, v)| v.state.clone_box())
                    .ok_or_else(|| err("no committed version visible at transaction start"))?;
                state.working.insert(tid, base);
                Ok(())
            }
            ObjectKind::Unversioned(_) => Err(err("object is unversioned")),
        }
    }

    pub fn with_working_copy<R>(
        &self,
        tid: TransactionId,
        f: impl FnOnce(&mut Box<dyn LocalObject>) -> R,
    ) -> Result<R> {
        match &self.0.kind {
            ObjectKind::Versioned(state) => {
                let mut state = state.write();
                let working = state
                    .working
                    .get_mut(&tid)
                    .ok_or_else(|| err("no working copy for transaction"))?;
                Ok(f(working))
            }
            ObjectKind::Unversioned(_) => Err(err("object is unversioned")),
        }
    }

    pub fn with_unversioned<R>(&self, f: impl FnOnce(&mut Box<dyn LocalObject>) -> R) -> Result<R> {
        match &self.0.kind {
            ObjectKind::Unversioned(lock) => {
                let mut guard = lock.lock();
                Ok(f(&mut guard))
            }
            ObjectKind::Versioned(_) => Err(err("object is versioned")),
        }
    }

    /// Installs the working copy for `tid` as the new committed head.
    /// `embedded` is the set of object references the version transitively
    /// contains, as discovered by the last call to `LocalObject::serialize`.
    pub fn commit(&self, tid: TransactionId, embedded: Vec<ObjectRef>) -> Result<()> {
        match &self.0.kind {
            ObjectKind::Versioned(state) => {
                let mut state = state.write();
                let working = state
                    .working
                    .remove(&tid)
                    .ok_or_else(|| err("no working copy to commit"))?;
                if let Some((&last, _)) = state.committed.iter().next_back() {
                    if tid <= last {
                        return Err(err("committed version ids must strictly increase"));
                    }
                }
                state
                    .committed
                    .insert(tid, Arc::new(Version { state: working, embedded }));
                Ok(())
            }
            ObjectKind::Unversioned(_) => Err(err("object is unversioned")),
        }
    }

    /// Installs a version that arrived from a remote peer directly, without
    /// going through a local fork/commit cycle. Used both for ordinary
    /// in-order `TransactionRecord` application and, with a lower `tid`,
    /// for reconciliation after a conflicting out-of-order record wins.
    pub fn install_remote_version(
        &self,
        tid: TransactionId,
        state: Box<dyn LocalObject>,
        embedded: Vec<ObjectRef>,
    ) -> Result<()> {
        match &self.0.kind {
            ObjectKind::Versioned(versioned) => {
                versioned
                    .write()
                    .committed
                    .insert(tid, Arc::new(Version { state, embedded }));
                Ok(())
            }
            ObjectKind::Unversioned(_) => Err(err("object is unversioned")),
        }
    }

    /// Drops every committed version with an id greater than or equal to
    /// `from_tid`. Used when a lower-id remote commit wins a conflict and
    /// local history must be rewound before replaying later local
    /// transactions on top of the winning version.
    pub fn truncate_history_from(&self, from_tid: TransactionId) -> Result<()> {
        match &self.0.kind {
            ObjectKind::Versioned(state) => {
                state.write().committed.retain(|&tid, _| tid < from_tid);
                Ok(())
            }
            ObjectKind::Unversioned(_) => Err(err("object is unversioned")),
        }
    }

    pub fn head(&self) -> Result<TransactionId> {
        match &self.0.kind {
            ObjectKind::Versioned(state) => state
                .read()
                .committed
                .keys()
                .next_back()
                .copied()
                .ok_or_else(|| err("object has no committed version")),
            ObjectKind::Unversioned(_) => Err(err("object is unversioned")),
        }
    }

    pub fn abort(&self, tid: TransactionId) -> Result<()> {
        match &self.0.kind {
            ObjectKind::Versioned(state) => {
                state.write().working.remove(&tid);
                Ok(())
            }
            ObjectKind::Unversioned(_) => Err(err("object is unversioned")),
        }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
impl Eq for ObjectRef {}
impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state)
    }
}
impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({})", self.id())
    }
}

/// Owns every shared object a peer knows about, keyed by object id, and is
/// the sole entry point for creating new ones. Named objects are
/// deduplicated by their deterministic id: a second `create_object` call
/// with the same name returns the first reference and discards the new
/// initial state.
#[derive(Default)]
pub struct ObjectStore {
    by_id: Mutex<HashMap<ObjectId, ObjectRef>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_object(
        &self,
        initial_state: Box<dyn LocalObject>,
        name: &str,
        versioned: bool,
    ) -> ObjectRef {
        let id = if name.is_empty() {
            ObjectId::new_anonymous()
        } else {
            ObjectId::for_name(name)
        };
        let mut by_id = self.by_id.lock();
        if let Some(existing) = by_id.get(&id) {
            return existing.clone();
        }
        let obj = if versioned {
            ObjectRef::new_versioned(id, initial_state)
        } else {
            ObjectRef::new_unversioned(id, initial_state)
        };
        by_id.insert(id, obj.clone());
        obj
    }

    pub fn get(&self, id: ObjectId) -> Option<ObjectRef> {
        self.by_id.lock().get(&id).cloned()
    }

    /// Registers an object under an id that was handed to this peer by
    /// someone else (a remote version or a reference embedded in one),
    /// rather than derived locally from a name. Returns the existing
    /// reference if `id` is already known.
    pub fn get_or_insert_with_id(
        &self,
        id: ObjectId,
        versioned: bool,
        initial_state: Box<dyn LocalObject>,
    ) -> ObjectRef {
        let mut by_id = self.by_id.lock();
        if let Some(existing) = by_id.get(&id) {
            return existing.clone();
        }
        let obj = if versioned {
            ObjectRef::new_versioned(id, initial_state)
        } else {
            ObjectRef::new_unversioned(id, initial_state)
        };
        by_id.insert(id, obj.clone());
        obj
    }

    /// Registers a reference obtained from a remote peer (delivered
    /// alongside a `TransactionRecord` or an `ObjectResponse`) so later
    /// lookups by id find it.
    pub fn insert(&self, obj: ObjectRef) {
        self.by_id.lock().entry(obj.id()).or_insert(obj);
    }

    pub fn objects_are_identical(&self, a: &ObjectRef, b: &ObjectRef) -> bool {
        a.id() == b.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_object::test_support::CounterObject;
    use crate::Value;

    #[test]
    fn create_object_is_name_idempotent() {
        let store = ObjectStore::new();
        let a = store.create_object(Box::new(CounterObject::new(1)), "shared", true);
        let b = store.create_object(Box::new(CounterObject::new(99)), "shared", true);
        assert!(store.objects_are_identical(&a, &b));
    }

    #[test]
    fn fork_commit_preserves_isolation_from_original() {
        let store = ObjectStore::new();
        let obj = store.create_object(Box::new(CounterObject::new(0)), "", true);
        let start = TransactionId::MIN;
        let tid = TransactionId::new(1, 0, 1);
        obj.fork(tid, start).unwrap();
        obj.with_working_copy(tid, |local| {
            local.invoke_method("add", &[Value::I64 { value: 5, local_type: 0 }])
        })
        .unwrap()
        .unwrap();
        obj.commit(tid, Vec::new()).unwrap();

        let original_version = obj.get_version(start).unwrap();
        assert_eq!(original_version.dump(), "CounterObject(0)");
        let new_version = obj.get_version(tid).unwrap();
        assert_eq!(new_version.dump(), "CounterObject(5)");
    }

    #[test]
    fn committed_versions_strictly_increase() {
        let store = ObjectStore::new();
        let obj = store.create_object(Box::new(CounterObject::new(0)), "", true);
        let tid = TransactionId::new(1, 0, 1);
        obj.fork(tid, TransactionId::MIN).unwrap();
        obj.commit(tid, Vec::new()).unwrap();

        obj.fork(TransactionId::MIN, TransactionId::MIN).ok();
        assert!(obj.commit(TransactionId::MIN, Vec::new()).is_err());
    }
}

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use aloft_base::{err, ObjectId, PeerId, Result, TransactionId};
use aloft_eval::{CallOutcome, DeserializationContext, Interpreter, LocalObject, ObjectRef, SerializationContext, Thread, Value};
use aloft_net::{Message, SerializedVersion};
use aloft_obj::ObjectStore;

use crate::transport::Transport;

/// One `invoke_method` call logged against a transaction, kept so a losing
/// local transaction can be replayed on top of a remote version that ends
/// up winning a conflict. Replaying by re-invoking method calls rather than
/// by diffing state is faithful only when the calls are commutative or
/// idempotent with whatever the new base now holds; see the design notes
/// on reconciliation for the tradeoff.
#[derive(Clone)]
struct CallLog {
    object_id: ObjectId,
    method_name: String,
    parameters: Vec<Value>,
}

struct Frame {
    id: TransactionId,
    writes: HashSet<ObjectId>,
    calls: Vec<CallLog>,
}

impl Frame {
    fn new(id: TransactionId) -> Self {
        Frame {
            id,
            writes: HashSet::new(),
            calls: Vec::new(),
        }
    }
}

thread_local! {
    /// This thread's nested transaction stack. Transactions begun on one
    /// thread are invisible to any other: there is no cross-thread sharing
    /// of in-flight (uncommitted) state.
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

#[derive(Clone)]
struct CommitRecord {
    peer_id: PeerId,
    writes: HashSet<ObjectId>,
    calls: Vec<CallLog>,
}

/// A placeholder installed for an object this peer has only heard about by
/// id (as a reference embedded in a version it received) but has not yet
/// fetched the bytes for. Replaced in practice the moment a real version
/// for that id is committed or installed; reading it before then yields an
/// object that refuses every method call.
#[derive(Clone)]
struct PendingFetch;

impl LocalObject for PendingFetch {
    fn clone_box(&self) -> Box<dyn LocalObject> {
        Box::new(self.clone())
    }

    fn serialize(&self, _ctx: &mut SerializationContext) -> Vec<u8> {
        Vec::new()
    }

    fn invoke_method(&mut self, _method_name: &str, _parameters: &[Value]) -> Result<Value> {
        Err(err("object referenced before its contents were fetched"))
    }

    fn dump(&self) -> String {
        "<pending fetch>".to_string()
    }
}

/// The C7 transaction engine: implements [`Thread`] for every worker thread
/// in this process, owns the commit log used for local conflict detection,
/// and reconciles incoming `TransactionRecord`s against it.
pub struct TransactionEngine {
    peer_id: PeerId,
    peer_seed: u64,
    store: Arc<ObjectStore>,
    interpreter: Arc<dyn Interpreter>,
    transport: Arc<dyn Transport>,
    last_known: Mutex<TransactionId>,
    committed: RwLock<BTreeMap<TransactionId, CommitRecord>>,
}

impl TransactionEngine {
    pub fn new(
        peer_id: PeerId,
        store: Arc<ObjectStore>,
        interpreter: Arc<dyn Interpreter>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (hi, _lo) = peer_id.to_be_words();
        TransactionEngine {
            peer_id,
            peer_seed: hi,
            store,
            interpreter,
            transport,
            last_known: Mutex::new(TransactionId::MIN),
            committed: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    /// Mints an id strictly greater than anything locally committed or
    /// observed from a remote peer so far.
    fn mint_local_id(&self) -> TransactionId {
        let mut last_known = self.last_known.lock();
        let next = last_known.next_after(self.peer_seed);
        *last_known = next;
        next
    }

    fn observe(&self, tid: TransactionId) {
        let mut last_known = self.last_known.lock();
        if tid > *last_known {
            *last_known = tid;
        }
    }

    fn in_transaction(&self) -> bool {
        STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// `true` if any transaction committed locally after `start` wrote to an
    /// object in `writes`: the write-set-intersection check run at commit
    /// time.
    fn has_local_conflict(&self, start: TransactionId, writes: &HashSet<ObjectId>) -> bool {
        self.committed
            .read()
            .range((Bound::Excluded(start), Bound::Unbounded))
            .any(|(_, record)| !record.writes.is_disjoint(writes))
    }

    fn commit_frame(&self, frame: Frame) -> Result<()> {
        let mut versions = Vec::with_capacity(frame.writes.len());
        for object_id in &frame.writes {
            let object = self
                .store
                .get(*object_id)
                .ok_or_else(|| err("committed write to an object the store no longer knows"))?;
            let mut ctx = SerializationContext::new();
            let bytes = object.with_working_copy(frame.id, |local| local.serialize(&mut ctx))?;
            let embedded = ctx.take_objects();
            let embedded_object_ids: Vec<ObjectId> = embedded.iter().map(|o| o.id()).collect();
            object.commit(frame.id, embedded)?;
            versions.push(SerializedVersion {
                object_id: *object_id,
                tid: frame.id,
                bytes,
                embedded_object_ids,
            });
        }

        self.committed.write().insert(
            frame.id,
            CommitRecord {
                peer_id: self.peer_id,
                writes: frame.writes.clone(),
                calls: frame.calls.clone(),
            },
        );
        self.observe(frame.id);

        if !versions.is_empty() {
            self.transport.broadcast(Message::TransactionRecord {
                tid: frame.id,
                peer_id: self.peer_id,
                writes: frame.writes.into_iter().collect(),
                versions,
            });
        }
        Ok(())
    }

    fn abort_frame(&self, frame: &Frame) {
        for object_id in &frame.writes {
            if let Some(object) = self.store.get(*object_id) {
                let _ = object.abort(frame.id);
            }
        }
    }

    /// Applies a `TransactionRecord` received from a remote peer. If `tid`
    /// postdates every locally committed transaction touching the same
    /// objects it is simply installed; otherwise it has lost a race with a
    /// local commit and the canonical tiebreak (smaller id wins) applies:
    /// local history for the touched objects is rewound to before `tid`,
    /// the incoming version is installed there instead, and every local
    /// transaction that the rewind displaced is replayed on top of it.
    pub fn apply_transaction_record(
        &self,
        tid: TransactionId,
        peer_id: PeerId,
        writes: Vec<ObjectId>,
        versions: Vec<SerializedVersion>,
    ) -> Result<()> {
        if peer_id == self.peer_id {
            return Ok(());
        }
        self.observe(tid);
        let touched: HashSet<ObjectId> = writes.iter().copied().collect();

        let displaced: Vec<(TransactionId, CommitRecord)> = {
            let committed = self.committed.read();
            committed
                .range((Bound::Excluded(tid), Bound::Unbounded))
                .filter(|(_, record)| !record.writes.is_disjoint(&touched))
                .map(|(&id, record)| (id, record.clone()))
                .collect()
        };

        if displaced.is_empty() {
            self.install_versions(tid, &versions)?;
            self.committed.write().insert(
                tid,
                CommitRecord {
                    peer_id,
                    writes: touched,
                    calls: Vec::new(),
                },
            );
            return Ok(());
        }

        info!(
            target: "aloft",
            "remote transaction {tid} conflicts with {} later local commit(s); remote wins by id order",
            displaced.len()
        );
        for object_id in &writes {
            if let Some(object) = self.store.get(*object_id) {
                object.truncate_history_from(tid)?;
            }
        }
        self.install_versions(tid, &versions)?;
        {
            let mut committed = self.committed.write();
            committed.insert(
                tid,
                CommitRecord {
                    peer_id,
                    writes: touched,
                    calls: Vec::new(),
                },
            );
            for (id, _) in &displaced {
                committed.remove(id);
            }
        }

        let mut ordered = displaced;
        ordered.sort_by_key(|(id, _)| *id);
        for (id, record) in ordered {
            if let Err(e) = self.replay(&record) {
                warn!(target: "aloft", "failed to replay displaced transaction {id}: {e:?}");
            }
        }
        Ok(())
    }

    /// Installs a single version delivered in reply to an `ObjectRequest`.
    pub fn receive_object_response(&self, version: SerializedVersion) -> Result<()> {
        self.observe(version.tid);
        self.install_versions(version.tid, std::slice::from_ref(&version))
    }

    /// Serializes an object's current head version for an `ObjectRequest`
    /// reply. Errs if the object, or any committed version of it, is
    /// unknown to this peer.
    pub fn serialize_head(&self, object_id: ObjectId) -> Result<SerializedVersion> {
        let object = self
            .store
            .get(object_id)
            .ok_or_else(|| err("no such object"))?;
        let head = object.head()?;
        let state = object.get_version(head)?;
        let mut ctx = SerializationContext::new();
        let bytes = state.serialize(&mut ctx);
        let embedded_object_ids = ctx.take_objects().iter().map(|o| o.id()).collect();
        Ok(SerializedVersion {
            object_id,
            tid: head,
            bytes,
            embedded_object_ids,
        })
    }

    fn install_versions(&self, tid: TransactionId, versions: &[SerializedVersion]) -> Result<()> {
        for version in versions {
            let embedded: Vec<ObjectRef> = version
                .embedded_object_ids
                .iter()
                .map(|id| {
                    self.store
                        .get(*id)
                        .unwrap_or_else(|| self.store.get_or_insert_with_id(*id, true, Box::new(PendingFetch)))
                })
                .collect();
            let mut ctx = DeserializationContext::new(embedded.clone());
            let state = self.interpreter.deserialize_object(&version.bytes, &mut ctx);
            let object = self
                .store
                .get(version.object_id)
                .unwrap_or_else(|| self.store.get_or_insert_with_id(version.object_id, true, Box::new(PendingFetch)));
            object.install_remote_version(tid, state, embedded)?;
            debug!(target: "aloft", "installed remote version of {} at {tid}", version.object_id);
        }
        Ok(())
    }

    /// Re-runs a locally committed transaction's logged method calls as a
    /// fresh transaction, on top of whatever base now exists. Used only
    /// during conflict reconciliation.
    fn replay(&self, record: &CommitRecord) -> Result<()> {
        self.begin_transaction()?;
        for call in &record.calls {
            let Some(object) = self.store.get(call.object_id) else {
                continue;
            };
            match self.call_method(&object, &call.method_name, &call.parameters) {
                Ok(CallOutcome::Returned(_)) => {}
                Ok(CallOutcome::Conflict) => {
                    warn!(target: "aloft", "replay of {} re-conflicted, dropping it", call.method_name);
                    return self.end_transaction().map(|_| ());
                }
                Err(e) => return Err(e),
            }
        }
        self.end_transaction()?;
        Ok(())
    }
}

impl Thread for TransactionEngine {
    fn begin_transaction(&self) -> Result<bool> {
        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let id = match stack.last() {
                Some(parent) => parent.id,
                None => self.mint_local_id(),
            };
            stack.push(Frame::new(id));
        });
        Ok(true)
    }

    fn end_transaction(&self) -> Result<bool> {
        let frame = STACK
            .with(|stack| stack.borrow_mut().pop())
            .ok_or_else(|| err("end_transaction called with no open transaction"))?;

        let is_outermost = STACK.with(|stack| stack.borrow().is_empty());
        if !is_outermost {
            STACK.with(|stack| {
                let mut stack = stack.borrow_mut();
                let parent = stack.last_mut().expect("checked non-empty above");
                parent.writes.extend(frame.writes);
                parent.calls.extend(frame.calls);
            });
            return Ok(true);
        }

        if self.has_local_conflict(frame.id, &frame.writes) {
            self.abort_frame(&frame);
            return Ok(false);
        }
        self.commit_frame(frame)?;
        Ok(true)
    }

    fn create_object(
        &self,
        initial_state: Box<dyn LocalObject>,
        name: &str,
        versioned: bool,
    ) -> ObjectRef {
        self.store.create_object(initial_state, name, versioned)
    }

    fn call_method(
        &self,
        object: &ObjectRef,
        method_name: &str,
        parameters: &[Value],
    ) -> Result<CallOutcome> {
        if !object.is_versioned() {
            let result = object.with_unversioned(|local| local.invoke_method(method_name, parameters))??;
            return Ok(CallOutcome::Returned(result));
        }

        if !self.in_transaction() {
            // Every top-level call to a versioned object is its own
            // implicit single-method transaction.
            self.begin_transaction()?;
            let outcome = self.call_method(object, method_name, parameters);
            return match outcome {
                Ok(CallOutcome::Returned(value)) => {
                    if self.end_transaction()? {
                        Ok(CallOutcome::Returned(value))
                    } else {
                        Ok(CallOutcome::Conflict)
                    }
                }
                other => other,
            };
        }

        let tid = STACK.with(|stack| stack.borrow().last().expect("checked above").id);
        object.fork(tid, tid)?;
        let result = object.with_working_copy(tid, |local| local.invoke_method(method_name, parameters))??;

        STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let frame = stack.last_mut().expect("checked above");
            frame.writes.insert(object.id());
            frame.calls.push(CallLog {
                object_id: object.id(),
                method_name: method_name.to_string(),
                parameters: parameters.to_vec(),
            });
        });
        Ok(CallOutcome::Returned(result))
    }

    fn objects_are_identical(&self, a: &ObjectRef, b: &ObjectRef) -> bool {
        self.store.objects_are_identical(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NullTransport;
    use std::sync::mpsc;
    use std::thread;
    use test_log::test;

    #[derive(Clone)]
    struct Counter {
        value: i64,
    }

    impl LocalObject for Counter {
        fn clone_box(&self) -> Box<dyn LocalObject> {
            Box::new(self.clone())
        }

        fn serialize(&self, _ctx: &mut SerializationContext) -> Vec<u8> {
            self.value.to_le_bytes().to_vec()
        }

        fn invoke_method(&mut self, method_name: &str, parameters: &[Value]) -> Result<Value> {
            match method_name {
                "get" => Ok(Value::I64 { value: self.value, local_type: 0 }),
                "add" => {
                    let delta = match parameters.first() {
                        Some(Value::I64 { value, .. }) => *value,
                        _ => return Err(err("add expects one i64 parameter")),
                    };
                    self.value += delta;
                    Ok(Value::I64 { value: self.value, local_type: 0 })
                }
                other => Err(err(format!("unknown method {other}"))),
            }
        }

        fn dump(&self) -> String {
            format!("Counter({})", self.value)
        }
    }

    struct CounterInterpreter;

    impl Interpreter for CounterInterpreter {
        fn deserialize_object(
            &self,
            bytes: &[u8],
            _ctx: &mut DeserializationContext,
        ) -> Box<dyn LocalObject> {
            let value = i64::from_le_bytes(bytes.try_into().expect("counter payload is 8 bytes"));
            Box::new(Counter { value })
        }
    }

    fn new_engine() -> (Arc<TransactionEngine>, Arc<NullTransport>) {
        let transport = Arc::new(NullTransport::new());
        let engine = Arc::new(TransactionEngine::new(
            PeerId::new_random(),
            Arc::new(ObjectStore::new()),
            Arc::new(CounterInterpreter),
            transport.clone(),
        ));
        (engine, transport)
    }

    #[test]
    fn top_level_call_commits_and_broadcasts() {
        let (engine, transport) = new_engine();
        let counter = engine.create_object(Box::new(Counter { value: 0 }), "", true);

        let outcome = engine
            .call_method(&counter, "add", &[Value::I64 { value: 5, local_type: 0 }])
            .unwrap();
        assert!(matches!(outcome, CallOutcome::Returned(Value::I64 { value: 5, .. })));

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Message::TransactionRecord { writes, .. } => assert_eq!(writes, &[counter.id()]),
            other => panic!("expected a TransactionRecord, got {other:?}"),
        }
    }

    #[test]
    fn nested_transaction_folds_writes_into_one_record() {
        let (engine, transport) = new_engine();
        let a = engine.create_object(Box::new(Counter { value: 0 }), "", true);
        let b = engine.create_object(Box::new(Counter { value: 0 }), "", true);

        engine.begin_transaction().unwrap();
        engine.call_method(&a, "add", &[Value::I64 { value: 1, local_type: 0 }]).unwrap();
        engine.begin_transaction().unwrap();
        engine.call_method(&b, "add", &[Value::I64 { value: 2, local_type: 0 }]).unwrap();
        assert!(engine.end_transaction().unwrap());
        assert!(engine.end_transaction().unwrap());

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Message::TransactionRecord { writes, .. } => {
                assert_eq!(writes.len(), 2);
                assert!(writes.contains(&a.id()));
                assert!(writes.contains(&b.id()));
            }
            other => panic!("expected a TransactionRecord, got {other:?}"),
        }
    }

    #[test]
    fn concurrent_writers_to_the_same_object_conflict() {
        let (engine, _transport) = new_engine();
        let counter = engine.create_object(Box::new(Counter { value: 0 }), "", true);

        let (to_b, from_main) = mpsc::channel::<()>();
        let (to_main, from_b) = mpsc::channel::<()>();

        engine.begin_transaction().unwrap();
        engine
            .call_method(&counter, "add", &[Value::I64 { value: 1, local_type: 0 }])
            .unwrap();

        let b_engine = engine.clone();
        let b_counter = counter.clone();
        let b = thread::spawn(move || {
            from_main.recv().unwrap();
            let outcome = b_engine
                .call_method(&b_counter, "add", &[Value::I64 { value: 100, local_type: 0 }])
                .unwrap();
            assert!(matches!(outcome, CallOutcome::Returned(_)));
            to_main.send(()).unwrap();
        });
        to_b.send(()).unwrap();
        from_b.recv().unwrap();
        b.join().unwrap();

        // B started and committed its own top-level transaction entirely
        // after A began, so A's pending write set now conflicts with a
        // transaction committed after A's start.
        assert!(!engine.end_transaction().unwrap());
    }

    #[test]
    fn apply_transaction_record_installs_an_unseen_object() {
        let (engine, _transport) = new_engine();
        let object_id = ObjectId::new_anonymous();
        let tid = TransactionId::new(1, 7, 1);
        let version = SerializedVersion {
            object_id,
            tid,
            bytes: 42i64.to_le_bytes().to_vec(),
            embedded_object_ids: Vec::new(),
        };

        engine
            .apply_transaction_record(tid, PeerId::new_random(), vec![object_id], vec![version])
            .unwrap();

        let installed = engine.store().get(object_id).unwrap();
        assert_eq!(installed.get_version(tid).unwrap().dump(), "Counter(42)");
    }

    #[test]
    fn losing_local_commit_is_replayed_on_the_winning_remote_version() {
        let (engine, _transport) = new_engine();
        let counter = engine.create_object(Box::new(Counter { value: 0 }), "", true);

        let outcome = engine
            .call_method(&counter, "add", &[Value::I64 { value: 5, local_type: 0 }])
            .unwrap();
        assert!(matches!(outcome, CallOutcome::Returned(Value::I64 { value: 5, .. })));
        let local_tid = counter.head().unwrap();

        // A remote id guaranteed to sort before the local one: same epoch,
        // zero peer seed, lowest counter.
        let remote_tid = TransactionId::new(local_tid.a(), 0, 0);
        let remote_version = SerializedVersion {
            object_id: counter.id(),
            tid: remote_tid,
            bytes: 100i64.to_le_bytes().to_vec(),
            embedded_object_ids: Vec::new(),
        };

        engine
            .apply_transaction_record(remote_tid, PeerId::new_random(), vec![counter.id()], vec![remote_version])
            .unwrap();

        // The remote write wins (smaller id); the local +5 is replayed on
        // top of it afterward.
        let head = counter.head().unwrap();
        assert_eq!(counter.get_version(head).unwrap().dump(), "Counter(105)");
    }
}

use aloft_base::Result;
use aloft_obj::{LocalObject, ObjectRef, Value};

/// The result of a method call: either the interpreter-visible return
/// value, or a conflict. On `Conflict` the interpreter must return from its
/// own method call immediately without observing any further engine state;
/// the engine drives the retry by re-invoking the enclosing call.
#[derive(Debug)]
pub enum CallOutcome {
    Returned(Value),
    Conflict,
}

/// A scoped handle an interpreter uses to drive transactions and method
/// calls. Valid only for the duration of the interpreter invocation it was
/// handed into; implemented by the transaction engine.
pub trait Thread: Send + Sync {
    /// Pushes a new transaction onto this thread's stack. Returns `Ok(false)`
    /// if starting the transaction conflicts with in-flight state.
    fn begin_transaction(&self) -> Result<bool>;

    /// Pops and commits the top transaction on this thread's stack. Only the
    /// outermost commit is visible to other peers. Returns `Ok(false)` on
    /// conflict.
    fn end_transaction(&self) -> Result<bool>;

    /// Creates (or, for a named object that already exists, looks up) a
    /// shared object.
    fn create_object(
        &self,
        initial_state: Box<dyn LocalObject>,
        name: &str,
        versioned: bool,
    ) -> ObjectRef;

    fn call_method(
        &self,
        object: &ObjectRef,
        method_name: &str,
        parameters: &[Value],
    ) -> Result<CallOutcome>;

    fn objects_are_identical(&self, a: &ObjectRef, b: &ObjectRef) -> bool;
}

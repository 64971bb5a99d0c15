use std::cell::RefCell;
use std::rc::Rc;

use crate::Interpreter;

thread_local! {
    /// The interpreter that owns the current thread, if any. Set only while
    /// a call is executing directly on the interpreter's own thread; lets
    /// nested engine callbacks call straight back into the interpreter
    /// instead of bouncing through the bridge, without threading an
    /// `Interpreter` handle through every signature.
    static CURRENT_INTERPRETER: RefCell<Option<Rc<dyn Interpreter>>> = const { RefCell::new(None) };
}

/// Returns the interpreter bound to this thread, if `set_current_interpreter`
/// has an active guard on it. When `None`, callers must go through the
/// interpreter's [`crate::InterpreterBridge`] instead of calling it directly.
pub fn current_interpreter() -> Option<Rc<dyn Interpreter>> {
    CURRENT_INTERPRETER.with(|cell| cell.borrow().clone())
}

/// Binds `interpreter` as the current thread's interpreter for the lifetime
/// of the returned guard, restoring whatever was previously bound when the
/// guard is dropped (including on an early return or unwind).
#[must_use]
pub fn set_current_interpreter(interpreter: Rc<dyn Interpreter>) -> CurrentInterpreterGuard {
    let previous = CURRENT_INTERPRETER.with(|cell| cell.replace(Some(interpreter)));
    CurrentInterpreterGuard { previous }
}

pub struct CurrentInterpreterGuard {
    previous: Option<Rc<dyn Interpreter>>,
}

impl Drop for CurrentInterpreterGuard {
    fn drop(&mut self) {
        CURRENT_INTERPRETER.with(|cell| *cell.borrow_mut() = self.previous.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aloft_obj::{DeserializationContext, LocalObject};

    struct StubInterpreter;
    impl Interpreter for StubInterpreter {
        fn deserialize_object(
            &self,
            _bytes: &[u8],
            _ctx: &mut DeserializationContext,
        ) -> Box<dyn LocalObject> {
            unimplemented!()
        }
    }

    #[test]
    fn guard_restores_previous_binding_on_drop() {
        assert!(current_interpreter().is_none());
        {
            let _outer = set_current_interpreter(Rc::new(StubInterpreter));
            assert!(current_interpreter().is_some());
            {
                let _inner = set_current_interpreter(Rc::new(StubInterpreter));
                assert!(current_interpreter().is_some());
            }
            assert!(current_interpreter().is_some());
        }
        assert!(current_interpreter().is_none());
    }
}

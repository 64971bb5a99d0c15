use aloft_base::Result;
use aloft_obj::{LocalObject, ObjectRef, Value};
use parking_lot::{Condvar, Mutex};

/// One of the operations the core needs an embedded interpreter to perform
/// on its own thread.
pub enum CallbackRequest {
    Clone(Box<dyn LocalObject>),
    Serialize(Box<dyn LocalObject>),
    Deserialize(Vec<u8>, Vec<ObjectRef>),
    InvokeMethod(Box<dyn LocalObject>, String, Vec<Value>),
}

pub enum CallbackResponse {
    Cloned(Box<dyn LocalObject>),
    Serialized(Vec<u8>),
    Deserialized(Box<dyn LocalObject>),
    Invoked(Result<Value>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Start,
    SettingParameters,
    ParametersSet,
    CallbackExecuting,
    CallbackReturned,
}

struct Inner {
    state: State,
    request: Option<CallbackRequest>,
    response: Option<CallbackResponse>,
}

/// Marshals a callback from a core thread to a (possibly single-threaded)
/// embedded interpreter's own event loop, and back. Exactly five states
/// cycle in a fixed order:
///
/// `Start -> SettingParameters -> ParametersSet -> CallbackExecuting ->
/// CallbackReturned -> Start`
///
/// guarded by one mutex and one condition variable. The core thread calls
/// [`InterpreterBridge::invoke_callback`] and blocks; the interpreter
/// thread calls [`InterpreterBridge::poll_for_callback`] from its own loop
/// to notice pending work, run it, and hand the result back.
pub struct InterpreterBridge {
    inner: Mutex<Inner>,
    condvar: Condvar,
}

impl Default for InterpreterBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl InterpreterBridge {
    pub fn new() -> Self {
        InterpreterBridge {
            inner: Mutex::new(Inner {
                state: State::Start,
                request: None,
                response: None,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Called by a core thread. Parks `request` for the interpreter's own
    /// thread to pick up and blocks until it has executed and produced a
    /// response.
    pub fn invoke_callback(&self, request: CallbackRequest) -> CallbackResponse {
        {
            let mut inner = self.inner.lock();
            assert_eq!(
                inner.state,
                State::Start,
                "invoke_callback called while a callback is already in flight"
            );
            inner.state = State::SettingParameters;
            inner.request = Some(request);
            inner.state = State::ParametersSet;
            self.condvar.notify_all();
        }

        let mut inner = self.inner.lock();
        while inner.state != State::CallbackReturned {
            self.condvar.wait(&mut inner);
        }
        let response = inner
            .response
            .take()
            .expect("transitioned to CallbackReturned without a response");
        inner.state = State::Start;
        self.condvar.notify_all();
        response
    }

    /// Called from the interpreter's own thread, typically from within its
    /// event loop. Blocks until a callback is pending, executes it via
    /// `run`, and publishes the result.
    pub fn poll_for_callback(&self, run: impl FnOnce(CallbackRequest) -> CallbackResponse) {
        let mut inner = self.inner.lock();
        while inner.state != State::ParametersSet {
            self.condvar.wait(&mut inner);
        }
        inner.state = State::CallbackExecuting;
        let request = inner
            .request
            .take()
            .expect("transitioned to ParametersSet without a request");
        drop(inner);

        let response = run(request);

        let mut inner = self.inner.lock();
        inner.response = Some(response);
        inner.state = State::CallbackReturned;
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aloft_obj::SerializationContext;
    use std::sync::Arc;
    use std::thread;

    #[derive(Clone)]
    struct NoopObject;

    impl LocalObject for NoopObject {
        fn clone_box(&self) -> Box<dyn LocalObject> {
            Box::new(self.clone())
        }
        fn serialize(&self, _ctx: &mut SerializationContext) -> Vec<u8> {
            Vec::new()
        }
        fn invoke_method(&mut self, _method_name: &str, _parameters: &[Value]) -> Result<Value> {
            Ok(Value::empty())
        }
        fn dump(&self) -> String {
            "NoopObject".to_string()
        }
    }

    #[test]
    fn round_trips_a_callback_across_threads() {
        let bridge = Arc::new(InterpreterBridge::new());
        let poller = {
            let bridge = bridge.clone();
            thread::spawn(move || {
                bridge.poll_for_callback(|request| match request {
                    CallbackRequest::InvokeMethod(_, name, _) => {
                        assert_eq!(name, "get");
                        CallbackResponse::Invoked(Ok(Value::I64 {
                            value: 42,
                            local_type: 0,
                        }))
                    }
                    _ => panic!("unexpected request"),
                });
            })
        };

        let response = bridge.invoke_callback(CallbackRequest::InvokeMethod(
            Box::new(NoopObject),
            "get".to_string(),
            Vec::new(),
        ));
        match response {
            CallbackResponse::Invoked(Ok(Value::I64 { value, .. })) => assert_eq!(value, 42),
            _ => panic!("unexpected response"),
        }
        poller.join().unwrap();
    }
}

mod callback;
mod current_interpreter;
mod interpreter;
mod thread;

pub use aloft_obj::{DeserializationContext, LocalObject, ObjectRef, SerializationContext, Value};
pub use callback::{CallbackRequest, CallbackResponse, InterpreterBridge};
pub use current_interpreter::{current_interpreter, set_current_interpreter, CurrentInterpreterGuard};
pub use interpreter::Interpreter;
pub use thread::{CallOutcome, Thread};

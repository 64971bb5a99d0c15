use aloft_base::Result;

use crate::serialize::SerializationContext;
use crate::Value;

/// The capability an interpreter-supplied object must provide so the
/// engine can clone, serialize, invoke methods on, and debug-print it
/// without knowing anything about the interpreter's own representation.
///
/// Versioned and unversioned objects both implement this same trait; the
/// object store dispatches purely on which storage variant holds the
/// object; it never needs a separate "kind" on the trait itself.
pub trait LocalObject: Send + Sync {
    fn clone_box(&self) -> Box<dyn LocalObject>;
    fn serialize(&self, ctx: &mut SerializationContext) -> Vec<u8>;
    fn invoke_method(&mut self, method_name: &str, parameters: &[Value]) -> Result<Value>;
    fn dump(&self) -> String;
}

impl Clone for Box<dyn LocalObject> {
    fn clone(&self) -> Self {
        self.as_ref().clone_box()
    }
}

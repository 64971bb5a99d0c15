use aloft_base::{err, Result};
use aloft_eval::{DeserializationContext, LocalObject, SerializationContext, Value};

use crate::WireTag;

/// A single `i64` supporting `get`/`add`: the demo language's stand-in for
/// a shared numeric counter, mirroring `aloft-obj`'s own `CounterObject`
/// test double but reachable outside that crate's test build.
#[derive(Clone)]
pub struct CounterObject {
    value: i64,
}

impl CounterObject {
    pub fn new(value: i64) -> Self {
        CounterObject { value }
    }

    pub(crate) fn from_payload(bytes: &[u8], _ctx: &DeserializationContext) -> Box<dyn LocalObject> {
        let value = i64::from_le_bytes(bytes.try_into().expect("counter payload is 8 bytes"));
        Box::new(CounterObject { value })
    }
}

impl LocalObject for CounterObject {
    fn clone_box(&self) -> Box<dyn LocalObject> {
        Box::new(self.clone())
    }

    fn serialize(&self, _ctx: &mut SerializationContext) -> Vec<u8> {
        let mut out = vec![WireTag::Counter as u8];
        out.extend_from_slice(&self.value.to_le_bytes());
        out
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
            other => Err(err(format!("CounterObject has no method {other}"))),
        }
    }

    fn dump(&self) -> String {
        format!("Counter({})", self.value)
    }
}

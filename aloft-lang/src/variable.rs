use aloft_base::{err, Result};
use aloft_eval::{DeserializationContext, LocalObject, ObjectRef, SerializationContext, Value};

use crate::WireTag;

/// A single-slot box holding a reference to another object, or nothing.
/// `set`/`get` are the only two operations; this is the demo language's
/// stand-in for a mutable local variable.
#[derive(Clone, Default)]
pub struct VariableObject {
    reference: Option<ObjectRef>,
}

impl VariableObject {
    pub fn unset() -> Self {
        VariableObject { reference: None }
    }

    pub fn pointing_to(reference: ObjectRef) -> Self {
        VariableObject { reference: Some(reference) }
    }

    pub(crate) fn from_payload(bytes: &[u8], ctx: &DeserializationContext) -> Box<dyn LocalObject> {
        let index = i64::from_le_bytes(bytes.try_into().expect("variable payload is 8 bytes"));
        let reference = if index < 0 {
            None
        } else {
            ctx.object_for_index(index as usize)
        };
        Box::new(VariableObject { reference })
    }
}

impl LocalObject for VariableObject {
    fn clone_box(&self) -> Box<dyn LocalObject> {
        Box::new(self.clone())
    }

    fn serialize(&self, ctx: &mut SerializationContext) -> Vec<u8> {
        let index: i64 = match &self.reference {
            Some(r) => ctx.index_for_object_ref(r) as i64,
            None => -1,
        };
        let mut out = vec![WireTag::Variable as u8];
        out.extend_from_slice(&index.to_le_bytes());
        out
    }

    fn invoke_method(&mut self, method_name: &str, parameters: &[Value]) -> Result<Value> {
        match method_name {
            "get" => {
                let reference = self
                    .reference
                    .clone()
                    .ok_or_else(|| err("variable is unset"))?;
                Ok(Value::Object { value: reference, local_type: 0 })
            }
            "set" => {
                let reference = parameters
                    .first()
                    .and_then(Value::as_object)
                    .cloned()
                    .ok_or_else(|| err("set expects one object parameter"))?;
                self.reference = Some(reference);
                Ok(Value::empty())
            }
            other => Err(err(format!("VariableObject has no method {other}"))),
        }
    }

    fn dump(&self) -> String {
        match &self.reference {
            Some(r) => format!("Variable(-> {})", r.id()),
            None => "Variable(unset)".to_string(),
        }
    }
}

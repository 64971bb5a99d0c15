use aloft_base::{err, Result};
use aloft_eval::{DeserializationContext, LocalObject, ObjectRef, SerializationContext, Value};

use crate::WireTag;

fn true_mod(a: i64, b: i64) -> i64 {
    ((a % b) + b) % b
}

/// An ordered, growable list of object references: `append`, `get_at`
/// (negative indexes wrap, matching the original language's semantics) and
/// `length`.
#[derive(Clone, Default)]
pub struct ListObject {
    items: Vec<ObjectRef>,
}

impl ListObject {
    pub fn new(items: Vec<ObjectRef>) -> Self {
        ListObject { items }
    }

    pub(crate) fn from_payload(bytes: &[u8], ctx: &DeserializationContext) -> Box<dyn LocalObject> {
        let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let mut items = Vec::with_capacity(count);
        for i in 0..count {
            let offset = 4 + i * 4;
            let index = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
            items.push(
                ctx.object_for_index(index)
                    .expect("list references an object index missing from the context"),
            );
        }
        Box::new(ListObject { items })
    }
}

impl LocalObject for ListObject {
    fn clone_box(&self) -> Box<dyn LocalObject> {
        Box::new(self.clone())
    }

    fn serialize(&self, ctx: &mut SerializationContext) -> Vec<u8> {
        let mut out = vec![WireTag::List as u8];
        out.extend_from_slice(&(self.items.len() as u32).to_le_bytes());
        for item in &self.items {
            let index = ctx.index_for_object_ref(item) as u32;
            out.extend_from_slice(&index.to_le_bytes());
        }
        out
    }

    fn invoke_method(&mut self, method_name: &str, parameters: &[Value]) -> Result<Value> {
        match method_name {
            "length" => Ok(Value::I64 { value: self.items.len() as i64, local_type: 0 }),
            "get_at" => {
                if self.items.is_empty() {
                    return Err(err("get_at on an empty list"));
                }
                let index = match parameters.first() {
                    Some(Value::I64 { value, .. }) => *value,
                    _ => return Err(err("get_at expects one i64 parameter")),
                };
                let index = true_mod(index, self.items.len() as i64) as usize;
                Ok(Value::Object { value: self.items[index].clone(), local_type: 0 })
            }
            "append" => {
                let reference = parameters
                    .first()
                    .and_then(Value::as_object)
                    .cloned()
                    .ok_or_else(|| err("append expects one object parameter"))?;
                self.items.push(reference);
                Ok(Value::empty())
            }
            other => Err(err(format!("ListObject has no method {other}"))),
        }
    }

    fn dump(&self) -> String {
        let ids: Vec<String> = self.items.iter().map(|r| r.id().to_string()).collect();
        format!("List([{}])", ids.join(", "))
    }
}

use std::collections::HashMap;

use aloft_base::{err, Result};
use aloft_eval::{DeserializationContext, LocalObject, ObjectRef, SerializationContext, Value};

use crate::WireTag;

/// A stack of lexical scopes, each mapping a name to an object reference.
/// `get`/`set` search from the innermost scope outward; `set` updates an
/// existing binding in whichever scope already has it, falling back to
/// defining a fresh one in the innermost scope.
#[derive(Clone)]
pub struct SymbolTableObject {
    scopes: Vec<HashMap<String, ObjectRef>>,
}

impl Default for SymbolTableObject {
    fn default() -> Self {
        SymbolTableObject { scopes: vec![HashMap::new()] }
    }
}

impl SymbolTableObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_payload(bytes: &[u8], ctx: &DeserializationContext) -> Box<dyn LocalObject> {
        let mut cursor = Cursor::new(bytes);
        let scope_count = cursor.read_u32();
        let mut scopes = Vec::with_capacity(scope_count as usize);
        for _ in 0..scope_count {
            let entry_count = cursor.read_u32();
            let mut map = HashMap::with_capacity(entry_count as usize);
            for _ in 0..entry_count {
                let name = cursor.read_string();
                let index = cursor.read_u32() as usize;
                let reference = ctx
                    .object_for_index(index)
                    .expect("symbol table references an object index missing from the context");
                map.insert(name, reference);
            }
            scopes.push(map);
        }
        Box::new(SymbolTableObject { scopes })
    }
}

impl LocalObject for SymbolTableObject {
    fn clone_box(&self) -> Box<dyn LocalObject> {
        Box::new(self.clone())
    }

    fn serialize(&self, ctx: &mut SerializationContext) -> Vec<u8> {
        let mut out = vec![WireTag::SymbolTable as u8];
        out.extend_from_slice(&(self.scopes.len() as u32).to_le_bytes());
        for scope in &self.scopes {
            out.extend_from_slice(&(scope.len() as u32).to_le_bytes());
            for (name, reference) in scope {
                out.extend_from_slice(&(name.len() as u32).to_le_bytes());
                out.extend_from_slice(name.as_bytes());
                let index = ctx.index_for_object_ref(reference) as u32;
                out.extend_from_slice(&index.to_le_bytes());
            }
        }
        out
    }

    fn invoke_method(&mut self, method_name: &str, parameters: &[Value]) -> Result<Value> {
        match method_name {
            "enter_scope" => {
                self.scopes.push(HashMap::new());
                Ok(Value::empty())
            }
            "leave_scope" => {
                if self.scopes.len() <= 1 {
                    return Err(err("cannot leave the outermost scope"));
                }
                self.scopes.pop();
                Ok(Value::empty())
            }
            "is_set" => {
                let name = expect_string(parameters.first())?;
                let found = self.scopes.iter().rev().any(|scope| scope.contains_key(name));
                Ok(Value::Bool { value: found, local_type: 0 })
            }
            "get" => {
                let name = expect_string(parameters.first())?;
                for scope in self.scopes.iter().rev() {
                    if let Some(reference) = scope.get(name) {
                        return Ok(Value::Object { value: reference.clone(), local_type: 0 });
                    }
                }
                Err(err(format!("symbol not found: {name}")))
            }
            "set" => {
                let name = expect_string(parameters.first())?.to_string();
                let reference = parameters
                    .get(1)
                    .and_then(Value::as_object)
                    .cloned()
                    .ok_or_else(|| err("set expects a name and an object parameter"))?;
                for scope in self.scopes.iter_mut().rev() {
                    if scope.contains_key(&name) {
                        scope.insert(name, reference);
                        return Ok(Value::empty());
                    }
                }
                self.scopes.last_mut().expect("always at least one scope").insert(name, reference);
                Ok(Value::empty())
            }
            other => Err(err(format!("SymbolTableObject has no method {other}"))),
        }
    }

    fn dump(&self) -> String {
        let scopes: Vec<String> = self
            .scopes
            .iter()
            .map(|scope| {
                let mut names: Vec<&str> = scope.keys().map(String::as_str).collect();
                names.sort_unstable();
                format!("{{{}}}", names.join(", "))
            })
            .collect();
        format!("SymbolTable({})", scopes.join(" -> "))
    }
}

fn expect_string(value: Option<&Value>) -> Result<&str> {
    match value {
        Some(Value::String { value, .. }) => Ok(value.as_str()),
        _ => Err(err("expected a string parameter")),
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn read_u32(&mut self) -> u32 {
        let value = u32::from_le_bytes(self.bytes[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        value
    }

    fn read_string(&mut self) -> String {
        let len = self.read_u32() as usize;
        let s = String::from_utf8(self.bytes[self.pos..self.pos + len].to_vec())
            .expect("symbol name is valid utf-8");
        self.pos += len;
        s
    }
}

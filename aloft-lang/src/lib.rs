//! A small demonstration interpreter: three object kinds (`VariableObject`,
//! `SymbolTableObject`, `ListObject`) exercised by this workspace's
//! integration tests and fixtures. It is not itself a core component; it
//! exists to give the transaction engine, object store, and wire protocol
//! something concrete to run.

mod counter;
mod list;
mod symbol_table;
mod variable;

use aloft_eval::{DeserializationContext, Interpreter, LocalObject};

pub use counter::CounterObject;
pub use list::ListObject;
pub use symbol_table::SymbolTableObject;
pub use variable::VariableObject;

#[repr(u8)]
enum WireTag {
    Variable = 0,
    SymbolTable = 1,
    List = 2,
    Counter = 3,
}

/// Reconstructs whichever of this crate's three object kinds a
/// `TransactionRecord` or `ObjectResponse` delivered, based on the type tag
/// each kind's own `serialize` prepends to its payload.
#[derive(Default)]
pub struct LangInterpreter;

impl LangInterpreter {
    pub fn new() -> Self {
        Self
    }
}

impl Interpreter for LangInterpreter {
    fn deserialize_object(
        &self,
        bytes: &[u8],
        ctx: &mut DeserializationContext,
    ) -> Box<dyn LocalObject> {
        let (&tag, payload) = bytes.split_first().expect("object payload is never empty");
        match tag {
            0 => variable::VariableObject::from_payload(payload, ctx),
            1 => symbol_table::SymbolTableObject::from_payload(payload, ctx),
            2 => list::ListObject::from_payload(payload, ctx),
            3 => counter::CounterObject::from_payload(payload, ctx),
            other => panic!("unknown aloft-lang object tag {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aloft_eval::{LocalObject, SerializationContext, Value};
    use aloft_obj::ObjectStore;

    #[test]
    fn variable_set_then_get_round_trips_through_serialization() {
        let store = ObjectStore::new();
        let target = store.create_object(Box::new(ListObject::new(Vec::new())), "", true);

        let var = VariableObject::pointing_to(target.clone());
        let mut ctx = SerializationContext::new();
        let bytes = var.serialize(&mut ctx);
        let embedded = ctx.take_objects();
        assert_eq!(embedded.len(), 1);
        assert_eq!(embedded[0].id(), target.id());

        let interpreter = LangInterpreter::new();
        let mut deser_ctx = DeserializationContext::new(embedded);
        let mut restored = interpreter.deserialize_object(&bytes, &mut deser_ctx);
        let value = restored.invoke_method("get", &[]).unwrap();
        assert_eq!(value.as_object().unwrap().id(), target.id());
    }

    #[test]
    fn symbol_table_scoping_shadows_and_unwinds() {
        let store = ObjectStore::new();
        let a = store.create_object(Box::new(ListObject::new(Vec::new())), "a", true);
        let b = store.create_object(Box::new(ListObject::new(Vec::new())), "b", true);

        let mut table = SymbolTableObject::new();
        table
            .invoke_method("set", &[Value::String { value: "x".into(), local_type: 0 }, Value::Object { value: a.clone(), local_type: 0 }])
            .unwrap();

        table.invoke_method("enter_scope", &[]).unwrap();
        table
            .invoke_method("set", &[Value::String { value: "x".into(), local_type: 0 }, Value::Object { value: b.clone(), local_type: 0 }])
            .unwrap();
        let shadowed = table.invoke_method("get", &[Value::String { value: "x".into(), local_type: 0 }]).unwrap();
        assert_eq!(shadowed.as_object().unwrap().id(), b.id());

        table.invoke_method("leave_scope", &[]).unwrap();
        let restored = table.invoke_method("get", &[Value::String { value: "x".into(), local_type: 0 }]).unwrap();
        assert_eq!(restored.as_object().unwrap().id(), a.id());
    }

    #[test]
    fn list_append_and_wraparound_index() {
        let store = ObjectStore::new();
        let a = store.create_object(Box::new(ListObject::new(Vec::new())), "", true);

        let mut list = ListObject::new(Vec::new());
        list.invoke_method("append", &[Value::Object { value: a.clone(), local_type: 0 }]).unwrap();
        let len = list.invoke_method("length", &[]).unwrap();
        assert!(matches!(len, Value::I64 { value: 1, .. }));

        let at_minus_one = list
            .invoke_method("get_at", &[Value::I64 { value: -1, local_type: 0 }])
            .unwrap();
        assert_eq!(at_minus_one.as_object().unwrap().id(), a.id());
    }
}

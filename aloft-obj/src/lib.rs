mod local_object;
mod serialize;
mod store;
mod value;

pub use local_object::LocalObject;
pub use serialize::{DeserializationContext, SerializationContext};
pub use store::{ObjectRef, ObjectStore};
pub use value::Value;

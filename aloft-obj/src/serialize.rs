use std::collections::HashMap;

use aloft_base::ObjectId;

use crate::ObjectRef;

/// Assigns each distinct object reference encountered while serializing a
/// local object a dense, zero-based index. Repeated references to the same
/// object get the same index; the caller finishes with `take_objects`, an
/// ordered list of the references that must accompany the serialized bytes
/// so the receiving peer knows what to fetch or attach.
#[derive(Default)]
pub struct SerializationContext {
    index_of: HashMap<ObjectId, usize>,
    order: Vec<ObjectRef>,
}

impl SerializationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_for_object_ref(&mut self, obj: &ObjectRef) -> usize {
        if let Some(&index) = self.index_of.get(&obj.id()) {
            return index;
        }
        let index = self.order.len();
        self.index_of.insert(obj.id(), index);
        self.order.push(obj.clone());
        index
    }

    pub fn take_objects(self) -> Vec<ObjectRef> {
        self.order
    }
}

/// The receiving-side counterpart of [`SerializationContext`]: translates
/// the indexes found in a deserialized payload back into object references,
/// using the ordered object list that traveled alongside the bytes.
pub struct DeserializationContext {
    objects: Vec<ObjectRef>,
}

impl DeserializationContext {
    pub fn new(objects: Vec<ObjectRef>) -> Self {
        DeserializationContext { objects }
    }

    pub fn object_for_index(&self, index: usize) -> Option<ObjectRef> {
        self.objects.get(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_object::test_support::CounterObject;
    use crate::ObjectStore;

    #[test]
    fn repeated_refs_share_an_index() {
        let store = ObjectStore::new();
        let o1 = store.create_object(Box::new(CounterObject::new(0)), "", true);
        let o2 = store.create_object(Box::new(CounterObject::new(0)), "", true);
        let o3 = store.create_object(Box::new(CounterObject::new(0)), "", true);

        let mut ctx = SerializationContext::new();
        let indexes: Vec<usize> = vec![&o1, &o2, &o1, &o3]
            .into_iter()
            .map(|o| ctx.index_for_object_ref(o))
            .collect();
        assert_eq!(indexes, vec![0, 1, 0, 2]);

        let objects = ctx.take_objects();
        assert_eq!(objects.len(), 3);
        assert_eq!(objects[0].id(), o1.id());
        assert_eq!(objects[1].id(), o2.id());
        assert_eq!(objects[2].id(), o3.id());
    }
}

//! Object identifiers and the reference wrapper.
//!
//! A reference wrapper is the wire-level stand-in for "return by reference":
//! wherever it appears inside params or a result, it names one live object in
//! the host registry instead of carrying a copied value.

use serde::de::{self, IgnoredAny, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Key tagging a JSON object as a reference wrapper.
pub const HANDLE_TAG: &str = "isHandle";

const OBJECT_ID_FIELD: &str = "objectId";
const EVENT_EMITTER_TAG: &str = "eventEmitter";

/// Identifier of one live object in the host registry.
///
/// Ids are allocated monotonically and never reused for the host process's
/// lifetime, so a stale id can fail but never alias a different object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    /// The implicit root object. Always resolvable, never released.
    pub const ROOT: ObjectId = ObjectId(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which operations a wrapper's handle exposes on the client.
///
/// The tag travels with the wrapper so the client knows statically whether
/// listener operations exist, without inspecting the remote value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Plain remote object: evaluate/release only.
    Object,
    /// Remote event emitter: additionally supports listener registration.
    EventEmitter,
}

/// Wire-level reference to a registered host object.
///
/// Serialized as `{"isHandle": true, "objectId": n}` for plain objects and
/// `{"isHandle": "eventEmitter", "objectId": n}` for event emitters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRef {
    pub kind: HandleKind,
    pub object_id: ObjectId,
}

impl HandleRef {
    pub fn object(object_id: ObjectId) -> Self {
        Self { kind: HandleKind::Object, object_id }
    }

    pub fn event_emitter(object_id: ObjectId) -> Self {
        Self { kind: HandleKind::EventEmitter, object_id }
    }

    /// Recognizes a wrapper embedded anywhere in a JSON tree.
    ///
    /// Returns `None` for any value that is not a wrapper object; a malformed
    /// wrapper (tag present, id missing) is also `None` rather than an error.
    pub fn from_value(value: &Value) -> Option<HandleRef> {
        let map = value.as_object()?;
        if !map.contains_key(HANDLE_TAG) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Wire form of this reference.
    pub fn to_value(&self) -> Value {
        let tag = match self.kind {
            HandleKind::Object => Value::Bool(true),
            HandleKind::EventEmitter => Value::String(EVENT_EMITTER_TAG.to_string()),
        };
        let mut map = Map::with_capacity(2);
        map.insert(HANDLE_TAG.to_string(), tag);
        map.insert(OBJECT_ID_FIELD.to_string(), Value::from(self.object_id.raw()));
        Value::Object(map)
    }
}

impl Serialize for HandleRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(2))?;
        match self.kind {
            HandleKind::Object => map.serialize_entry(HANDLE_TAG, &true)?,
            HandleKind::EventEmitter => map.serialize_entry(HANDLE_TAG, EVENT_EMITTER_TAG)?,
        }
        map.serialize_entry(OBJECT_ID_FIELD, &self.object_id)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for HandleRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RefVisitor;

        impl<'de> Visitor<'de> for RefVisitor {
            type Value = HandleRef;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a reference wrapper object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<HandleRef, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let mut kind = None;
                let mut object_id = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        HANDLE_TAG => {
                            let tag: Value = map.next_value()?;
                            kind = Some(match tag {
                                Value::Bool(true) => HandleKind::Object,
                                Value::String(ref s) if s == EVENT_EMITTER_TAG => {
                                    HandleKind::EventEmitter
                                }
                                other => {
                                    return Err(de::Error::custom(format!(
                                        "invalid {HANDLE_TAG} tag: {other}"
                                    )));
                                }
                            });
                        }
                        OBJECT_ID_FIELD => object_id = Some(map.next_value()?),
                        _ => {
                            let _ = map.next_value::<IgnoredAny>()?;
                        }
                    }
                }
                let kind = kind.ok_or_else(|| de::Error::missing_field(HANDLE_TAG))?;
                let object_id = object_id.ok_or_else(|| de::Error::missing_field(OBJECT_ID_FIELD))?;
                Ok(HandleRef { kind, object_id })
            }
        }

        deserializer.deserialize_map(RefVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_wrapper_round_trips() {
        let reference = HandleRef::object(ObjectId::new(7));
        let value = reference.to_value();
        assert_eq!(value, json!({"isHandle": true, "objectId": 7}));
        assert_eq!(HandleRef::from_value(&value), Some(reference));
    }

    #[test]
    fn event_emitter_wrapper_carries_string_tag() {
        let reference = HandleRef::event_emitter(ObjectId::new(3));
        let value = reference.to_value();
        assert_eq!(value, json!({"isHandle": "eventEmitter", "objectId": 3}));
        let parsed = HandleRef::from_value(&value).unwrap();
        assert_eq!(parsed.kind, HandleKind::EventEmitter);
        assert_eq!(parsed.object_id, ObjectId::new(3));
    }

    #[test]
    fn plain_json_is_not_a_wrapper() {
        assert_eq!(HandleRef::from_value(&json!(42)), None);
        assert_eq!(HandleRef::from_value(&json!({"objectId": 1})), None);
        assert_eq!(HandleRef::from_value(&json!([true, 1])), None);
    }

    #[test]
    fn malformed_tag_is_rejected() {
        assert_eq!(
            HandleRef::from_value(&json!({"isHandle": "bogus", "objectId": 1})),
            None
        );
        assert_eq!(HandleRef::from_value(&json!({"isHandle": false, "objectId": 1})), None);
    }

    #[test]
    fn root_id_is_reserved() {
        assert!(ObjectId::ROOT.is_root());
        assert!(!ObjectId::new(1).is_root());
        assert_eq!(ObjectId::ROOT.raw(), 0);
    }
}

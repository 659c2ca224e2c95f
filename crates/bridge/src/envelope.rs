use serde_json::{Map, Value};

use crate::BridgeError;

/// Server-to-client hub method carrying bus messages
pub const HUB_BROADCAST_METHOD: &str = "send";

/// Field the bus reads the event discriminator from
pub const BUS_TYPE_FIELD: &str = "type";

/// A validated inbound hub message.
///
/// `kind` is the value of the configured type key; `fields` is the whole
/// envelope, the type key included.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub kind: String,
    pub fields: Map<String, Value>,
}

impl InboundMessage {
    /// Validate an envelope, which must be an object with a non-empty string
    /// under `type_key`.
    pub fn from_envelope(envelope: Value, type_key: &str) -> Result<Self, BridgeError> {
        let missing = || BridgeError::MissingTypeKey {
            type_key: type_key.to_string(),
        };

        let Value::Object(fields) = envelope else {
            return Err(missing());
        };
        match fields.get(type_key) {
            Some(Value::String(kind)) if !kind.is_empty() => Ok(Self {
                kind: kind.clone(),
                fields,
            }),
            _ => Err(missing()),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// The bus shape of the message: its fields with the discriminator under
    /// [`BUS_TYPE_FIELD`]. A custom type key stays beside it.
    pub fn into_value(self) -> Value {
        let mut fields = self.fields;
        fields.insert(BUS_TYPE_FIELD.to_string(), Value::String(self.kind));
        Value::Object(fields)
    }
}

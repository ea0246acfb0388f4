//! # Wire vocabulary shared by the session, processor and router.
//!
//! Everything the bridge sends or receives is expressed with these types:
//! - [`Message`] inbound signals (sender, interface, member, object path, [`Body`]);
//! - [`MethodCall`] outbound requests built by the helpers below;
//! - [`WireValue`] a value paired with the wire type inferred for a write.

use serde_json::Value;

use crate::error::CallError;

/// Interface carrying device values and their change signals.
pub const ITEM_INTERFACE: &str = "com.victronenergy.BusItem";
/// Core bus management interface (rename signal).
pub const BUS_INTERFACE: &str = "org.freedesktop.DBus";

/// Field holding the raw value inside an item dictionary.
pub const VALUE_FIELD: &str = "Value";
/// Field holding the formatted text inside an item dictionary.
pub const TEXT_FIELD: &str = "Text";

/// Path every service exposes with its device instance.
pub const DEVICE_INSTANCE_PATH: &str = "/DeviceInstance";

/// Member names used on the wire.
pub mod member {
    /// Value read of one path.
    pub const GET_VALUE: &str = "GetValue";
    /// Bulk read of a service's whole tree.
    pub const GET_ITEMS: &str = "GetItems";
    /// Value write of one path.
    pub const SET_VALUE: &str = "SetValue";
    /// Multi-path change signal.
    pub const ITEMS_CHANGED: &str = "ItemsChanged";
    /// Single-path change signal.
    pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";
    /// Rename (owner appeared/disappeared) signal.
    pub const NAME_OWNER_CHANGED: &str = "NameOwnerChanged";
}

/// One `(path, fields)` tuple as carried by items-changed signals and bulk reads.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawEntry {
    /// Object path of the item; absent in malformed payloads.
    pub path: Option<String>,
    /// Field name → value pairs (`Value`, `Text`, …).
    pub fields: Vec<(String, Value)>,
}

impl RawEntry {
    /// Builds an entry carrying a value and an optional text field.
    pub fn new(path: impl Into<String>, value: Value, text: Option<&str>) -> Self {
        let mut fields = vec![(VALUE_FIELD.to_string(), value)];
        if let Some(text) = text {
            fields.push((TEXT_FIELD.to_string(), Value::String(text.to_string())));
        }
        Self {
            path: Some(path.into()),
            fields,
        }
    }

    /// Returns the first field with the given name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

/// Decoded message body.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Body {
    /// No payload (write acknowledgements, filter installs).
    #[default]
    Empty,
    /// A single value (value-read replies).
    Value(Value),
    /// A list of item entries (items-changed signal, bulk-read reply).
    Items(Vec<RawEntry>),
    /// A property dictionary for the message's own object path.
    Properties(Vec<(String, Value)>),
    /// Rename signal arguments; empty owner strings mean "none".
    NameOwnerChanged {
        name: String,
        old_owner: String,
        new_owner: String,
    },
}

/// An inbound signal.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Transient owner id of the emitter.
    pub sender: String,
    pub interface: String,
    pub member: String,
    /// Object path the signal was emitted on.
    pub path: String,
    pub body: Body,
}

/// A signal filter to install on the connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchRule {
    pub interface: &'static str,
    pub member: &'static str,
}

impl MatchRule {
    /// The three filters every session installs.
    pub fn defaults() -> [MatchRule; 3] {
        [
            MatchRule {
                interface: ITEM_INTERFACE,
                member: member::ITEMS_CHANGED,
            },
            MatchRule {
                interface: ITEM_INTERFACE,
                member: member::PROPERTIES_CHANGED,
            },
            MatchRule {
                interface: BUS_INTERFACE,
                member: member::NAME_OWNER_CHANGED,
            },
        ]
    }

    /// Textual match-rule form understood by bus daemons.
    pub fn to_rule_string(&self) -> String {
        format!(
            "type='signal',interface='{}',member='{}'",
            self.interface, self.member
        )
    }
}

/// Wire type of a written value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireType {
    Int32,
    Double,
    String,
    /// The bus's "no value" representation.
    EmptyArray,
}

impl WireType {
    /// Type signature character(s).
    pub fn signature(&self) -> &'static str {
        match self {
            WireType::Int32 => "i",
            WireType::Double => "d",
            WireType::String => "s",
            WireType::EmptyArray => "ai",
        }
    }
}

/// A value tagged with its wire type.
#[derive(Clone, Debug, PartialEq)]
pub struct WireValue {
    pub ty: WireType,
    pub value: Value,
}

impl WireValue {
    /// Infers the wire type of `value` for a write to `path`.
    ///
    /// integer fitting in 32 bits → `i`, any other number → `d`, string → `s`,
    /// bool → `i` (0/1), null → empty array. Arrays and objects are rejected.
    ///
    /// # Example
    /// ```
    /// use busbridge::transport::{WireType, WireValue};
    /// use serde_json::json;
    ///
    /// assert_eq!(WireValue::infer("/Mode", &json!(3)).unwrap().ty, WireType::Int32);
    /// assert_eq!(WireValue::infer("/Soc", &json!(12.5)).unwrap().ty, WireType::Double);
    /// assert!(WireValue::infer("/Mode", &json!([1, 2])).is_err());
    /// ```
    pub fn infer(path: &str, value: &Value) -> Result<Self, CallError> {
        let (ty, value) = match value {
            Value::Null => (WireType::EmptyArray, Value::Array(Vec::new())),
            Value::Bool(b) => (WireType::Int32, Value::from(i64::from(*b))),
            Value::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Some(i) => (WireType::Int32, Value::from(i)),
                None => match n.as_f64() {
                    Some(f) => (WireType::Double, Value::from(f)),
                    None => {
                        return Err(CallError::UnsupportedValue {
                            path: path.to_string(),
                            reason: format!("number {n} has no wire representation"),
                        });
                    }
                },
            },
            Value::String(_) => (WireType::String, value.clone()),
            Value::Array(_) | Value::Object(_) => {
                return Err(CallError::UnsupportedValue {
                    path: path.to_string(),
                    reason: "only scalar values can be written".to_string(),
                });
            }
        };
        Ok(Self { ty, value })
    }
}

/// An outbound request.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodCall {
    pub destination: String,
    pub path: String,
    pub interface: &'static str,
    pub member: &'static str,
    pub arg: Option<WireValue>,
}

impl MethodCall {
    /// Value read of `path` on `destination`.
    pub fn get_value(destination: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            path: path.into(),
            interface: ITEM_INTERFACE,
            member: member::GET_VALUE,
            arg: None,
        }
    }

    /// Bulk read of the whole tree of `destination`.
    pub fn get_items(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            path: "/".to_string(),
            interface: ITEM_INTERFACE,
            member: member::GET_ITEMS,
            arg: None,
        }
    }

    /// Value write of `path` on `destination`.
    pub fn set_value(
        destination: impl Into<String>,
        path: impl Into<String>,
        value: WireValue,
    ) -> Self {
        Self {
            destination: destination.into(),
            path: path.into(),
            interface: ITEM_INTERFACE,
            member: member::SET_VALUE,
            arg: Some(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_bool_and_null() {
        let t = WireValue::infer("/Relay/0/State", &json!(true)).expect("bool");
        assert_eq!(t.ty, WireType::Int32);
        assert_eq!(t.value, json!(1));

        let n = WireValue::infer("/Relay/0/State", &Value::Null).expect("null");
        assert_eq!(n.ty.signature(), "ai");
        assert_eq!(n.value, json!([]));
    }

    #[test]
    fn test_infer_wide_integer_as_double() {
        let t = WireValue::infer("/Energy", &json!(4_294_967_296u64)).expect("wide");
        assert_eq!(t.ty, WireType::Double);
        assert_eq!(t.value, json!(4_294_967_296.0));

        let t = WireValue::infer("/Offset", &json!(-2_147_483_649i64)).expect("wide");
        assert_eq!(t.ty, WireType::Double);

        let t = WireValue::infer("/Mode", &json!(i32::MIN)).expect("narrow");
        assert_eq!(t.ty, WireType::Int32);
    }

    #[test]
    fn test_infer_string() {
        let s = WireValue::infer("/CustomName", &json!("Kitchen")).expect("string");
        assert_eq!(s.ty, WireType::String);
    }

    #[test]
    fn test_match_rule_string() {
        let rules = MatchRule::defaults();
        assert_eq!(
            rules[2].to_rule_string(),
            "type='signal',interface='org.freedesktop.DBus',member='NameOwnerChanged'"
        );
    }
}

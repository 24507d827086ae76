//! Argument validation against a capability's declared [`Schema`], plus the
//! typed accessors capabilities use once validation has passed.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::{json, Map, Value};

use crate::errors::SentinelError;
use crate::types::{FieldSpec, FieldType, Schema};

impl Schema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Check `args` against the field list.
    ///
    /// `null` is accepted as an empty argument object. Unknown fields are
    /// rejected, as are explicit nulls for required fields.
    pub fn validate(&self, capability: &str, args: &Value) -> Result<(), SentinelError> {
        let empty = Map::new();
        let object = match args {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(SentinelError::invalid_arguments(
                    capability,
                    format!("arguments must be an object, got {}", type_name(other)),
                ))
            }
        };

        for key in object.keys() {
            if !self.fields.iter().any(|f| f.name == key) {
                return Err(SentinelError::invalid_arguments(
                    capability,
                    format!("unknown field '{key}'"),
                ));
            }
        }

        for field in &self.fields {
            match object.get(field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(SentinelError::invalid_arguments(
                        capability,
                        format!("missing required field '{}'", field.name),
                    ));
                }
                None | Some(Value::Null) => {}
                Some(value) => check_field(capability, field, value)?,
            }
        }
        Ok(())
    }

    /// JSON-Schema object describing the arguments, as tool parameters.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(field.kind.json_type()));
            prop.insert("description".into(), json!(field.description));
            if field.kind == FieldType::StringArray {
                prop.insert("items".into(), json!({ "type": "string" }));
            }
            if let Some(allowed) = field.allowed {
                prop.insert("enum".into(), json!(allowed));
            }
            properties.insert(field.name.to_string(), Value::Object(prop));
        }

        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

fn check_field(capability: &str, field: &FieldSpec, value: &Value) -> Result<(), SentinelError> {
    let ok = match field.kind {
        FieldType::String => value.is_string(),
        FieldType::Integer => value.is_i64() || value.is_u64(),
        FieldType::Number => value.is_number() || value.as_str().and_then(parse_decimal).is_some(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::StringArray => value
            .as_array()
            .is_some_and(|items| items.iter().all(Value::is_string)),
    };
    if !ok {
        return Err(SentinelError::invalid_arguments(
            capability,
            format!(
                "field '{}' must be {}, got {}",
                field.name,
                field.kind.json_type(),
                type_name(value)
            ),
        ));
    }

    if let (Some(allowed), Some(s)) = (field.allowed, value.as_str()) {
        if !allowed.contains(&s) {
            return Err(SentinelError::invalid_arguments(
                capability,
                format!("field '{}' must be one of {:?}, got '{s}'", field.name, allowed),
            ));
        }
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s.trim())
        .ok()
        .or_else(|| Decimal::from_scientific(s.trim()).ok())
}

// ---------------------------------------------------------------------------
// Accessors (call after validation)
// ---------------------------------------------------------------------------

pub fn str_arg<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

pub fn u64_arg(args: &Value, name: &str) -> Option<u64> {
    args.get(name).and_then(Value::as_u64)
}

pub fn bool_arg(args: &Value, name: &str) -> Option<bool> {
    args.get(name).and_then(Value::as_bool)
}

/// Decimal from either a JSON number or a numeric string.
pub fn decimal_arg(args: &Value, name: &str) -> Option<Decimal> {
    match args.get(name)? {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

pub fn string_list_arg(args: &Value, name: &str) -> Option<Vec<String>> {
    args.get(name)?.as_array().map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SIDES: &[&str] = &["buy", "sell"];

    fn trade_schema() -> Schema {
        Schema::new(vec![
            FieldSpec::required("symbol", FieldType::String, "Instrument symbol"),
            FieldSpec::required("side", FieldType::String, "Order side").one_of(SIDES),
            FieldSpec::required("quantity", FieldType::Number, "Base quantity"),
            FieldSpec::optional("limit", FieldType::Integer, "Bars"),
            FieldSpec::optional("tags", FieldType::StringArray, "Labels"),
        ])
    }

    #[test]
    fn test_accepts_valid_arguments() {
        let args = json!({"symbol": "BTCUSDT", "side": "buy", "quantity": "0.01", "limit": 5});
        assert!(trade_schema().validate("execute_trade", &args).is_ok());
    }

    #[test]
    fn test_null_is_empty_object() {
        assert!(Schema::empty().validate("get_system_status", &Value::Null).is_ok());
        let err = trade_schema().validate("execute_trade", &Value::Null).unwrap_err();
        assert!(err.to_string().contains("missing required field 'symbol'"));
    }

    #[test]
    fn test_rejects_non_object() {
        let err = trade_schema().validate("execute_trade", &json!([1, 2])).unwrap_err();
        assert!(matches!(err, SentinelError::InvalidArguments { .. }));
        assert!(err.to_string().contains("got array"));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let args = json!({"symbol": "BTCUSDT", "side": "buy", "quantity": 1, "leverage": 10});
        let err = trade_schema().validate("execute_trade", &args).unwrap_err();
        assert!(err.to_string().contains("unknown field 'leverage'"));
    }

    #[test]
    fn test_rejects_type_mismatch() {
        let args = json!({"symbol": "BTCUSDT", "side": "buy", "quantity": "lots"});
        let err = trade_schema().validate("execute_trade", &args).unwrap_err();
        assert!(err.to_string().contains("field 'quantity' must be number"));

        let args = json!({"symbol": "BTCUSDT", "side": "buy", "quantity": 1, "limit": 2.5});
        assert!(trade_schema().validate("execute_trade", &args).is_err());

        let args = json!({"symbol": "BTCUSDT", "side": "buy", "quantity": 1, "tags": ["a", 3]});
        assert!(trade_schema().validate("execute_trade", &args).is_err());
    }

    #[test]
    fn test_rejects_value_outside_allowed_set() {
        let args = json!({"symbol": "BTCUSDT", "side": "short", "quantity": 1});
        let err = trade_schema().validate("execute_trade", &args).unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }

    #[test]
    fn test_json_schema_rendering() {
        let schema = trade_schema().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["required"], json!(["symbol", "side", "quantity"]));
        assert_eq!(schema["properties"]["side"]["enum"], json!(["buy", "sell"]));
        assert_eq!(schema["properties"]["tags"]["items"]["type"], "string");
        assert_eq!(schema["properties"]["limit"]["type"], "integer");
    }

    #[test]
    fn test_accessors() {
        let args = json!({"symbol": "ETHUSDT", "quantity": 0.5, "price": "1e2", "limit": 3, "tags": ["x"]});
        assert_eq!(str_arg(&args, "symbol"), Some("ETHUSDT"));
        assert_eq!(decimal_arg(&args, "quantity"), Some(dec!(0.5)));
        assert_eq!(decimal_arg(&args, "price"), Some(dec!(100)));
        assert_eq!(u64_arg(&args, "limit"), Some(3));
        assert_eq!(string_list_arg(&args, "tags"), Some(vec!["x".to_string()]));
        assert_eq!(bool_arg(&args, "missing"), None);
    }
}

//! Binding a raw JSON argument payload against declared parameters.

use anyhow::{Result, anyhow};
use serde_json::{Map, Number, Value};

use super::{ParamSpec, ParamType};
use crate::error::SkillError;

/// Arguments bound against a skill's parameter list.
///
/// Every declared parameter is present: either supplied by the caller
/// (converted to its declared type), its default, or `null`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: Map<String, Value>,
}

impl Args {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// The bound value, or `None` when it is absent or `null`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("missing string argument: {name}"))
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Result<i64> {
        self.get(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("missing integer argument: {name}"))
    }

    pub fn f64(&self, name: &str) -> Result<f64> {
        self.get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("missing number argument: {name}"))
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        self.get(name)
            .and_then(Value::as_bool)
            .ok_or_else(|| anyhow!("missing boolean argument: {name}"))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

/// Parse the request body. An empty body is an empty argument object.
pub fn parse_payload(payload: &str) -> Result<Map<String, Value>, SkillError> {
    if payload.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(SkillError::malformed(format!(
            "Arguments must be a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(SkillError::malformed(format!("Invalid JSON arguments: {e}"))),
    }
}

/// Bind `raw` against `params`. Argument names match case-insensitively,
/// preferring an exact match. Unknown arguments are ignored.
pub fn bind(params: &[ParamSpec], raw: &Map<String, Value>) -> Result<Args, SkillError> {
    let mut values = Map::with_capacity(params.len());

    for param in params {
        let supplied = raw.get(&param.name).or_else(|| {
            raw.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&param.name))
                .map(|(_, v)| v)
        });

        let value = match supplied.filter(|v| !v.is_null()) {
            Some(v) => coerce(v, param.kind)
                .ok_or_else(|| SkillError::untypeable(&param.name, param.kind.as_str()))?,
            None if param.required => return Err(SkillError::missing(&param.name)),
            None => param.default.clone().unwrap_or(Value::Null),
        };
        values.insert(param.name.clone(), value);
    }

    Ok(Args::new(values))
}

/// Lenient conversion: numbers and booleans may arrive as strings, scalars
/// may be read as strings.
fn coerce(value: &Value, kind: ParamType) -> Option<Value> {
    match kind {
        ParamType::Any => Some(value.clone()),
        ParamType::String => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        ParamType::Integer => match value {
            Value::Number(n) => n.as_i64().map(Value::from).or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| Value::from(f as i64))
            }),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        ParamType::Number => match value {
            Value::Number(n) => n.as_f64().and_then(Number::from_f64).map(Value::Number),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            _ => None,
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(Value::Bool(false)),
            _ => None,
        },
        ParamType::Array => value.is_array().then(|| value.clone()),
        ParamType::Object => value.is_object().then(|| value.clone()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("objectName", ParamType::String),
            ParamSpec::optional("r", ParamType::Number, 1.0),
            ParamSpec::nullable("tag", ParamType::String),
        ]
    }

    fn raw(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn empty_payload_is_empty_object() {
        assert!(parse_payload("").unwrap().is_empty());
        assert!(parse_payload("   ").unwrap().is_empty());
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let err = parse_payload("[1, 2]").unwrap_err();
        assert_eq!(err.kind(), "ArgumentBinding");
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = parse_payload("{not json").unwrap_err();
        assert!(err.to_string().starts_with("Invalid JSON arguments"));
    }

    #[test]
    fn defaults_and_nulls_fill_omitted_params() {
        let args = bind(&params(), &raw(json!({"objectName": "Cube"}))).unwrap();
        assert_eq!(args.str("objectName").unwrap(), "Cube");
        assert_eq!(args.f64("r").unwrap(), 1.0);
        assert!(args.get("tag").is_none());
        assert_eq!(args.as_map().len(), 3);
    }

    #[test]
    fn names_match_case_insensitively() {
        let args = bind(&params(), &raw(json!({"OBJECTNAME": "Cube"}))).unwrap();
        assert_eq!(args.str("objectName").unwrap(), "Cube");
    }

    #[test]
    fn exact_match_wins_over_case_insensitive() {
        let args = bind(
            &params(),
            &raw(json!({"objectname": "wrong", "objectName": "right"})),
        )
        .unwrap();
        assert_eq!(args.str("objectName").unwrap(), "right");
    }

    #[test]
    fn missing_required_names_parameter() {
        let err = bind(&params(), &raw(json!({"r": 0.5}))).unwrap_err();
        assert_eq!(
            err,
            SkillError::ArgumentBinding {
                parameter: Some("objectName".to_string()),
                reason: "Missing required parameter: objectName".to_string(),
            }
        );
    }

    #[test]
    fn explicit_null_counts_as_missing() {
        let err = bind(&params(), &raw(json!({"objectName": null}))).unwrap_err();
        assert_eq!(err, SkillError::missing("objectName"));
    }

    #[test]
    fn numeric_strings_are_converted() {
        let specs = vec![
            ParamSpec::required("count", ParamType::Integer),
            ParamSpec::required("scale", ParamType::Number),
            ParamSpec::required("visible", ParamType::Boolean),
        ];
        let args = bind(
            &specs,
            &raw(json!({"count": "3", "scale": "0.5", "visible": "TRUE"})),
        )
        .unwrap();
        assert_eq!(args.i64("count").unwrap(), 3);
        assert_eq!(args.f64("scale").unwrap(), 0.5);
        assert!(args.bool("visible").unwrap());
    }

    #[test]
    fn integral_float_binds_as_integer() {
        let specs = vec![ParamSpec::required("count", ParamType::Integer)];
        let args = bind(&specs, &raw(json!({"count": 4.0}))).unwrap();
        assert_eq!(args.i64("count").unwrap(), 4);
    }

    #[test]
    fn untypeable_value_names_parameter() {
        let specs = vec![ParamSpec::required("count", ParamType::Integer)];
        let err = bind(&specs, &raw(json!({"count": "many"}))).unwrap_err();
        assert_eq!(err, SkillError::untypeable("count", "integer"));
    }

    #[test]
    fn unknown_arguments_are_ignored() {
        let args = bind(
            &params(),
            &raw(json!({"objectName": "Cube", "extra": true})),
        )
        .unwrap();
        assert!(args.get("extra").is_none());
    }
}

//! Optional positional-argument decoder: maps a job's `args` array onto a
//! caller-described set of scalar fields, in order.
//!
//! This is pure convenience, entirely outside the hot path — the
//! `Manager`/`Fetcher`/worker pool never call it. The source this crate was
//! distilled from carried two subtly different decoders (one re-encoding
//! through JSON, one setting fields directly) that disagree on `null` and
//! numeric overflow. We pick one contract and state it: **direct set on
//! scalar kinds, fail on non-scalars** — no reflection, no re-encoding.

use serde_json::Value;

/// The scalar kinds a target field can be decoded as. `Composite` exists so
/// callers can describe a field that isn't supported by this decoder and
/// get a clear error instead of silent truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Bool,
    Composite,
}

/// Describes one positional target field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// A successfully decoded scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Why a single field failed to decode.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("field `{field}`: {message}")]
pub struct FieldDecodeError {
    pub field: String,
    pub message: String,
}

/// Decode `args` into `fields`, in array order. Each field decodes (or
/// fails) independently; callers get one `Result` per field rather than an
/// all-or-nothing outcome, so a handler can choose how to react to a
/// partially-decodable payload.
pub fn decode_args(
    args: &[Value],
    fields: &[FieldSpec],
) -> Vec<Result<DecodedValue, FieldDecodeError>> {
    fields
        .iter()
        .enumerate()
        .map(|(i, spec)| decode_one(args.get(i), spec))
        .collect()
}

fn decode_one(value: Option<&Value>, spec: &FieldSpec) -> Result<DecodedValue, FieldDecodeError> {
    let err = |message: &str| {
        Err(FieldDecodeError {
            field: spec.name.clone(),
            message: message.to_string(),
        })
    };

    if spec.kind == FieldKind::Composite {
        return err("composite fields are not supported by the direct-set decoder");
    }

    let value = match value {
        Some(v) => v,
        None => return err("missing positional argument"),
    };

    match spec.kind {
        FieldKind::Composite => unreachable!("handled above"),
        FieldKind::String => match value {
            Value::String(s) => Ok(DecodedValue::Str(s.clone())),
            _ => err("expected a JSON string"),
        },
        FieldKind::Integer => match value.as_i64() {
            Some(n) => Ok(DecodedValue::Int(n)),
            None => err("expected a JSON integer that fits in i64"),
        },
        FieldKind::Float => match value.as_f64() {
            Some(n) => Ok(DecodedValue::Float(n)),
            None => err("expected a JSON number"),
        },
        FieldKind::Bool => match value {
            Value::Bool(b) => Ok(DecodedValue::Bool(*b)),
            _ => err("expected a JSON boolean"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_scalars_in_order() {
        let args = vec![Value::from("hi"), Value::from(7), Value::from(1.5), Value::from(true)];
        let fields = vec![
            FieldSpec::new("greeting", FieldKind::String),
            FieldSpec::new("count", FieldKind::Integer),
            FieldSpec::new("ratio", FieldKind::Float),
            FieldSpec::new("flag", FieldKind::Bool),
        ];
        let decoded = decode_args(&args, &fields);
        assert_eq!(decoded[0], Ok(DecodedValue::Str("hi".into())));
        assert_eq!(decoded[1], Ok(DecodedValue::Int(7)));
        assert_eq!(decoded[2], Ok(DecodedValue::Float(1.5)));
        assert_eq!(decoded[3], Ok(DecodedValue::Bool(true)));
    }

    #[test]
    fn null_fails_rather_than_silently_defaulting() {
        let args = vec![Value::Null];
        let fields = vec![FieldSpec::new("count", FieldKind::Integer)];
        assert!(decode_args(&args, &fields)[0].is_err());
    }

    #[test]
    fn composite_kind_always_fails() {
        let args = vec![Value::from(vec![1, 2, 3])];
        let fields = vec![FieldSpec::new("list", FieldKind::Composite)];
        assert!(decode_args(&args, &fields)[0].is_err());
    }

    #[test]
    fn missing_argument_fails() {
        let fields = vec![FieldSpec::new("count", FieldKind::Integer)];
        assert!(decode_args(&[], &fields)[0].is_err());
    }
}

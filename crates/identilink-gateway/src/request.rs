//! `/identify` request validation.

use identilink_core::Observation;
use serde_json::{Number, Value};
use thiserror::Error;

/// Input rejected before it reaches the resolver. The display text is the
/// exact message returned to the caller.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid JSON body")]
    InvalidJson,

    #[error("Phone number must be a string")]
    PhoneNotString,

    #[error("Email must be a string")]
    EmailNotString,

    #[error("Phone number or email is required")]
    MissingIdentifier,
}

/// Parse a raw `/identify` body into a normalized observation.
///
/// `phoneNumber` may be a string or a JSON number. Null, empty and blank
/// values count as absent. Checks run phone type, email type, then presence.
/// An empty body is treated as `{}`.
pub fn parse_identify(body: &[u8]) -> Result<Observation, ValidationError> {
    let value: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(body).map_err(|_| ValidationError::InvalidJson)?
    };

    let field = |name: &str| value.as_object().and_then(|o| o.get(name));

    let phone_number = match field("phoneNumber") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(number_text(n)),
        Some(_) => return Err(ValidationError::PhoneNotString),
    };
    let email = match field("email") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(ValidationError::EmailNotString),
    };

    Observation::new(email, phone_number).map_err(|_| ValidationError::MissingIdentifier)
}

/// Decimal text of a JSON number. Integral values print without a fraction
/// or exponent, so `1e3`, `1000.0` and `1000` are the same identifier.
fn number_text(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f == 0.0 => "0".to_string(),
        Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
        _ => n.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<Observation, ValidationError> {
        parse_identify(body.as_bytes())
    }

    #[test]
    fn accepts_string_fields() {
        let obs = parse(r#"{"email":" a@x.com ","phoneNumber":"123456"}"#).unwrap();
        assert_eq!(obs.email(), Some("a@x.com"));
        assert_eq!(obs.phone_number(), Some("123456"));
    }

    #[test]
    fn numeric_phone_becomes_text() {
        let obs = parse(r#"{"phoneNumber":123456}"#).unwrap();
        assert_eq!(obs.phone_number(), Some("123456"));
        assert_eq!(obs.email(), None);
    }

    #[test]
    fn integral_floats_match_their_integer_form() {
        for body in [
            r#"{"phoneNumber":1000}"#,
            r#"{"phoneNumber":1000.0}"#,
            r#"{"phoneNumber":1e3}"#,
        ] {
            assert_eq!(parse(body).unwrap().phone_number(), Some("1000"), "{body}");
        }
        assert_eq!(parse(r#"{"phoneNumber":-0.0}"#).unwrap().phone_number(), Some("0"));
        assert_eq!(parse(r#"{"phoneNumber":12.5}"#).unwrap().phone_number(), Some("12.5"));
    }

    #[test]
    fn phone_type_checked_before_email_type() {
        assert_eq!(
            parse(r#"{"phoneNumber":true,"email":42}"#).unwrap_err(),
            ValidationError::PhoneNotString
        );
        assert_eq!(
            parse(r#"{"phoneNumber":"1","email":["a"]}"#).unwrap_err(),
            ValidationError::EmailNotString
        );
    }

    #[test]
    fn null_and_blank_fields_are_absent() {
        assert_eq!(
            parse(r#"{"phoneNumber":null,"email":"   "}"#).unwrap_err(),
            ValidationError::MissingIdentifier
        );
        assert_eq!(parse("").unwrap_err(), ValidationError::MissingIdentifier);
        assert_eq!(parse("[1,2]").unwrap_err(), ValidationError::MissingIdentifier);
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert_eq!(parse("{email:").unwrap_err(), ValidationError::InvalidJson);
    }
}

//! Field validators.
//!
//! Each [`SchemaFieldEditorValidator`] that constrains stored values compiles
//! to a [`FieldValidator`]. `Default` only affects creates and has no
//! validator.

use crate::error::SchemaViolation;
use crate::schema::model::{SchemaField, SchemaFieldEditorValidator};
use configstore_codec::ValueData;
use std::net::{IpAddr, SocketAddr};

/// A check applied to one field of an entity on every write.
pub trait FieldValidator: Send + Sync {
    /// Checks the field's value; `None` means the field is absent.
    fn check(&self, field: &SchemaField, value: Option<&ValueData>) -> Result<(), SchemaViolation>;
}

/// Field must be present; strings and bytes must also be non-empty.
#[derive(Debug, Clone, Copy)]
pub struct RequiredValidator;

impl FieldValidator for RequiredValidator {
    fn check(&self, field: &SchemaField, value: Option<&ValueData>) -> Result<(), SchemaViolation> {
        let present = match value {
            None => false,
            Some(ValueData::String(s)) => !s.is_empty(),
            Some(ValueData::Bytes(b)) => !b.is_empty(),
            Some(_) => true,
        };
        if present {
            Ok(())
        } else {
            Err(SchemaViolation::MissingRequiredField {
                field: field.name.clone(),
            })
        }
    }
}

/// String length in characters, or bytes length, must equal `length`.
#[derive(Debug, Clone, Copy)]
pub struct FixedLengthValidator {
    /// Required length.
    pub length: u64,
}

impl FieldValidator for FixedLengthValidator {
    fn check(&self, field: &SchemaField, value: Option<&ValueData>) -> Result<(), SchemaViolation> {
        let actual = match value {
            Some(ValueData::String(s)) => s.chars().count(),
            Some(ValueData::Bytes(b)) => b.len(),
            _ => return Ok(()),
        } as u64;
        if actual == self.length {
            Ok(())
        } else {
            Err(SchemaViolation::FixedLength {
                field: field.name.clone(),
                expected: self.length,
                actual,
            })
        }
    }
}

/// String must parse as an IP address. Empty strings pass.
#[derive(Debug, Clone, Copy)]
pub struct IpAddressValidator;

impl FieldValidator for IpAddressValidator {
    fn check(&self, field: &SchemaField, value: Option<&ValueData>) -> Result<(), SchemaViolation> {
        match value {
            Some(ValueData::String(s)) if !s.is_empty() && s.parse::<IpAddr>().is_err() => {
                Err(SchemaViolation::InvalidFormat {
                    field: field.name.clone(),
                    format: "an IP address",
                })
            }
            _ => Ok(()),
        }
    }
}

/// String must parse as `address:port`. Empty strings pass.
#[derive(Debug, Clone, Copy)]
pub struct IpAddressPortValidator;

impl FieldValidator for IpAddressPortValidator {
    fn check(&self, field: &SchemaField, value: Option<&ValueData>) -> Result<(), SchemaViolation> {
        match value {
            Some(ValueData::String(s)) if !s.is_empty() && s.parse::<SocketAddr>().is_err() => {
                Err(SchemaViolation::InvalidFormat {
                    field: field.name.clone(),
                    format: "an IP address with port",
                })
            }
            _ => Ok(()),
        }
    }
}

/// Compiles a declared validator; `None` for validators that never reject.
pub fn compile(validator: &SchemaFieldEditorValidator) -> Option<Box<dyn FieldValidator>> {
    match validator {
        SchemaFieldEditorValidator::Required => Some(Box::new(RequiredValidator)),
        SchemaFieldEditorValidator::FixedLength { length } => {
            Some(Box::new(FixedLengthValidator { length: *length }))
        }
        SchemaFieldEditorValidator::FormatIpAddress => Some(Box::new(IpAddressValidator)),
        SchemaFieldEditorValidator::FormatIpAddressPort => Some(Box::new(IpAddressPortValidator)),
        SchemaFieldEditorValidator::Default { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use configstore_codec::ValueType;

    fn field(t: ValueType) -> SchemaField {
        SchemaField::new(1, "f", t)
    }

    #[test]
    fn required() {
        let f = field(ValueType::String);
        assert!(RequiredValidator.check(&f, None).is_err());
        assert!(RequiredValidator
            .check(&f, Some(&ValueData::String(String::new())))
            .is_err());
        assert!(RequiredValidator.check(&f, Some(&"x".into())).is_ok());
        let b = field(ValueType::Boolean);
        assert!(RequiredValidator
            .check(&b, Some(&ValueData::Boolean(false)))
            .is_ok());
    }

    #[test]
    fn fixed_length_counts_chars() {
        let f = field(ValueType::String);
        let v = FixedLengthValidator { length: 3 };
        assert!(v.check(&f, Some(&"äbc".into())).is_ok());
        assert!(matches!(
            v.check(&f, Some(&"abcd".into())),
            Err(SchemaViolation::FixedLength {
                expected: 3,
                actual: 4,
                ..
            })
        ));
        assert!(v.check(&f, None).is_ok());
        assert!(v.check(&f, Some(&ValueData::Bytes(vec![1, 2, 3]))).is_ok());
    }

    #[test]
    fn ip_formats() {
        let f = field(ValueType::String);
        assert!(IpAddressValidator.check(&f, Some(&"10.0.0.1".into())).is_ok());
        assert!(IpAddressValidator.check(&f, Some(&"::1".into())).is_ok());
        assert!(IpAddressValidator.check(&f, Some(&"example.com".into())).is_err());
        assert!(IpAddressValidator.check(&f, Some(&"".into())).is_ok());

        assert!(IpAddressPortValidator
            .check(&f, Some(&"10.0.0.1:8080".into()))
            .is_ok());
        assert!(IpAddressPortValidator
            .check(&f, Some(&"[::1]:443".into()))
            .is_ok());
        assert!(IpAddressPortValidator
            .check(&f, Some(&"10.0.0.1".into()))
            .is_err());
    }

    #[test]
    fn default_compiles_to_nothing() {
        let v = SchemaFieldEditorValidator::Default {
            value: configstore_codec::Value::new(0, 1i64),
        };
        assert!(compile(&v).is_none());
        assert!(compile(&SchemaFieldEditorValidator::Required).is_some());
    }
}

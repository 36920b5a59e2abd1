//! Typed scalar values carried by attribute assignments.
//!
//! Values cover the primitives plus the domain scalars a ledger-style graph
//! needs: quantities with an enum unit, UTC timestamps and enum tags.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Mul;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::EnumValue;

/// A magnitude in some unit, e.g. `10.0 EN.Unit.dollars`.
///
/// The unit is an enum variant so units are interned the same way every
/// other type is.
///
/// ```
/// # use chronograph::{Graph, Quantity};
/// let graph = Graph::new();
/// let dollars = graph.enum_value("Unit", "dollars").unwrap();
/// let price = Quantity::new(2.5, dollars.clone());
/// let total = 4.0 * price;
/// assert_eq!(total, Quantity::new(10.0, dollars));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    /// Numeric magnitude.
    pub magnitude: f64,
    /// Unit tag.
    pub unit: EnumValue,
}

impl Quantity {
    /// Creates a quantity.
    #[must_use]
    pub const fn new(magnitude: f64, unit: EnumValue) -> Self {
        Self { magnitude, unit }
    }

    /// Adds two quantities of the same unit.
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleValues` if the units differ.
    pub fn checked_add(&self, other: &Self) -> Result<Self, ValidationError> {
        if self.unit != other.unit {
            return Err(ValidationError::IncompatibleValues {
                reason: format!("cannot add {} to {}", other.unit, self.unit),
            });
        }
        Ok(Self::new(self.magnitude + other.magnitude, self.unit.clone()))
    }

    /// Multiplies the magnitude by `factor`, keeping the unit.
    #[must_use]
    pub fn scale(&self, factor: f64) -> Self {
        Self::new(self.magnitude * factor, self.unit.clone())
    }
}

impl Mul<f64> for Quantity {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.magnitude * rhs, self.unit)
    }
}

impl Mul<Quantity> for f64 {
    type Output = Quantity;

    fn mul(self, rhs: Quantity) -> Quantity {
        rhs * self
    }
}

impl Mul<EnumValue> for f64 {
    type Output = Quantity;

    fn mul(self, unit: EnumValue) -> Quantity {
        Quantity::new(self, unit)
    }
}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.unit == other.unit {
            self.magnitude.partial_cmp(&other.magnitude)
        } else {
            None
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.magnitude, self.unit.variant())
    }
}

/// Scalar payload of an attribute assignment.
///
/// # Examples
///
/// ```
/// use chronograph::Value;
///
/// let amount = Value::Float(10.0);
/// let label = Value::from("General");
///
/// assert!(amount.is_float());
/// assert_eq!(label.as_string(), Some("General"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    String(String),
    /// Magnitude with a unit.
    Quantity(Quantity),
    /// Point in time, UTC.
    Time(DateTime<Utc>),
    /// Enum variant.
    Enum(EnumValue),
}

impl Value {
    /// Returns true for `Bool`.
    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    /// Returns true for `Int`.
    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    /// Returns true for `Float`.
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    /// Returns true for `String`.
    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    /// Returns true for `Quantity`.
    pub const fn is_quantity(&self) -> bool {
        matches!(self, Self::Quantity(_))
    }

    /// Returns true for `Time`.
    pub const fn is_time(&self) -> bool {
        matches!(self, Self::Time(_))
    }

    /// Returns true for `Enum`.
    pub const fn is_enum(&self) -> bool {
        matches!(self, Self::Enum(_))
    }

    /// The flag of a `Bool`.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The integer of an `Int`.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view: floats, ints and quantity magnitudes.
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Quantity(q) => Some(q.magnitude),
            _ => None,
        }
    }

    /// The text of a `String`.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// The quantity of a `Quantity`.
    pub const fn as_quantity(&self) -> Option<&Quantity> {
        match self {
            Self::Quantity(q) => Some(q),
            _ => None,
        }
    }

    /// The timestamp of a `Time`.
    pub const fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// The variant of an `Enum`.
    pub const fn as_enum(&self) -> Option<&EnumValue> {
        match self {
            Self::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Quantity(_) => "quantity",
            Self::Time(_) => "time",
            Self::Enum(_) => "enum",
        }
    }

    /// Adds two values for aggregation.
    ///
    /// Ints add with overflow checking, an int mixed with a float gives a
    /// float, and quantities add when their units match.
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleValues` for any other combination and on integer
    /// overflow.
    #[allow(clippy::cast_precision_loss)]
    pub fn checked_add(&self, other: &Self) -> Result<Self, ValidationError> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.checked_add(*b).map(Self::Int).ok_or_else(|| {
                ValidationError::IncompatibleValues {
                    reason: format!("integer overflow adding {a} and {b}"),
                }
            }),
            (Self::Float(a), Self::Float(b)) => Ok(Self::Float(a + b)),
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                Ok(Self::Float(*a as f64 + b))
            }
            (Self::Quantity(a), Self::Quantity(b)) => a.checked_add(b).map(Self::Quantity),
            (a, b) => Err(ValidationError::IncompatibleValues {
                reason: format!("cannot add {} to {}", b.type_name(), a.type_name()),
            }),
        }
    }
}

impl PartialOrd for Value {
    #[allow(clippy::cast_precision_loss)]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Int(b)) => a.partial_cmp(b),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::String(a), Self::String(b)) => a.partial_cmp(b),
            (Self::Quantity(a), Self::Quantity(b)) => a.partial_cmp(b),
            (Self::Time(a), Self::Time(b)) => a.partial_cmp(b),
            (Self::Enum(a), Self::Enum(b)) if a.enum_type() == b.enum_type() => {
                a.variant().partial_cmp(b.variant())
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Quantity(q) => write!(f, "{q}"),
            Self::Time(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Enum(e) => write!(f, "{e}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Quantity> for Value {
    fn from(v: Quantity) -> Self {
        Self::Quantity(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(v)
    }
}

impl From<EnumValue> for Value {
    fn from(v: EnumValue) -> Self {
        Self::Enum(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeKind, TypeRegistry};

    fn unit(registry: &TypeRegistry, variant: &str) -> EnumValue {
        let token = registry.declare(TypeKind::Enum, "Unit").unwrap();
        EnumValue::new(token, variant).unwrap()
    }

    #[test]
    fn test_numeric_accessors() {
        let val = Value::Int(42);
        assert!(val.is_int());
        assert_eq!(val.as_int(), Some(42));
        assert_eq!(val.as_float(), Some(42.0));
        assert!(Value::Bool(true).as_float().is_none());
    }

    #[test]
    fn test_sum_promotes_int_to_float() {
        let sum = Value::Int(2).checked_add(&Value::Float(0.5)).unwrap();
        assert_eq!(sum, Value::Float(2.5));
    }

    #[test]
    fn test_int_overflow_is_reported() {
        let err = Value::Int(i64::MAX).checked_add(&Value::Int(1)).unwrap_err();
        assert!(err.to_string().contains("overflow"));
    }

    #[test]
    fn test_quantities_add_within_unit() {
        let registry = TypeRegistry::new();
        let dollars = unit(&registry, "dollars");
        let a = Value::from(Quantity::new(10.0, dollars.clone()));
        let b = Value::from(2.5 * dollars.clone());
        assert_eq!(
            a.checked_add(&b).unwrap(),
            Value::Quantity(Quantity::new(12.5, dollars))
        );
    }

    #[test]
    fn test_mixed_units_are_incompatible() {
        let registry = TypeRegistry::new();
        let dollars = Quantity::new(1.0, unit(&registry, "dollars"));
        let aud = Quantity::new(1.0, unit(&registry, "AUD"));
        assert!(dollars.checked_add(&aud).is_err());
        assert_eq!(dollars.partial_cmp(&aud), None);
    }

    #[test]
    fn test_scalar_multiplication() {
        let registry = TypeRegistry::new();
        let aud = unit(&registry, "AUD");
        let budget = 200.0 * aud.clone();
        assert_eq!(budget.scale(0.5), Quantity::new(100.0, aud));
        assert_eq!(budget.to_string(), "200 AUD");
    }

    #[test]
    fn test_ordering_across_kinds() {
        assert!(Value::Int(1) < Value::Float(1.5));
        assert!(Value::from("a") < Value::from("b"));
        assert_eq!(Value::Int(1).partial_cmp(&Value::from("1")), None);
    }

    #[test]
    fn test_string_plus_int_is_rejected() {
        assert!(Value::from("x").checked_add(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_value_serialization() {
        let registry = TypeRegistry::new();
        let val = Value::Enum(unit(&registry, "dollars"));
        let json = serde_json::to_string(&val).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(val, back);
    }
}

//! Declarative field validation.
//!
//! Constraints are declared on record fields with `#[validate(...)]` and checked by
//! [`crate::record::Record::validate`] before a record is encoded. The derive macro expands them
//! into calls on a [`Violations`] collector, which gathers *every* violation instead of stopping at
//! the first one:
//!
//! ```ignore
//! #[derive(Clone, Serialize, Deserialize, Record)]
//! pub struct NewUser {
//!     #[validate(range(min = 0, max = 130))]
//!     pub age: u8,
//!     #[serde(rename = "e-mail")]
//!     #[validate(required, email)]
//!     pub email: String,
//!     #[validate(max_len = 2)]
//!     pub relations: HashMap<String, String>,
//! }
//! ```
//!
//! Hand-written records can use the collector directly.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::LazyLock,
};

use regex::Regex;

use crate::error::{DocumentStoreError, DocumentStoreResult};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").expect("email pattern is valid")
});

/// The constraint a field violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Required,
    Range,
    MinLen,
    MaxLen,
    Email,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Constraint::Required => "required",
            Constraint::Range => "range",
            Constraint::MinLen => "min_len",
            Constraint::MaxLen => "max_len",
            Constraint::Email => "email",
        })
    }
}

/// A single violated constraint on a single document field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldViolation {
    /// The document field name.
    pub field: String,
    pub constraint: Constraint,
    pub message: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.field, self.constraint, self.message)
    }
}

/// Collects field violations for one record.
#[derive(Debug, Default)]
pub struct Violations {
    violations: Vec<FieldViolation>,
}

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, constraint: Constraint, message: impl Into<String>) -> &mut Self {
        self.violations.push(FieldViolation {
            field: field.to_string(),
            constraint,
            message: message.into(),
        });
        self
    }

    /// The field must not hold its zero value.
    pub fn required<T: IsZero + ?Sized>(&mut self, field: &str, value: &T) -> &mut Self {
        if value.is_zero() {
            self.push(field, Constraint::Required, "value is required");
        }
        self
    }

    /// The numeric field must lie within `[min, max]`. Absent optional values pass.
    pub fn range<T: AsNumber + ?Sized>(
        &mut self,
        field: &str,
        value: &T,
        min: Option<f64>,
        max: Option<f64>,
    ) -> &mut Self {
        let Some(number) = value.as_number() else {
            return self;
        };

        if let Some(min) = min.filter(|min| number < *min) {
            self.push(field, Constraint::Range, format!("{number} is less than {min}"));
        }
        if let Some(max) = max.filter(|max| number > *max) {
            self.push(field, Constraint::Range, format!("{number} is greater than {max}"));
        }
        self
    }

    /// The field (string, sequence or map) must have at least `min` elements.
    pub fn min_len<T: HasLength + ?Sized>(&mut self, field: &str, value: &T, min: usize) -> &mut Self {
        if let Some(len) = value.length().filter(|len| *len < min) {
            self.push(field, Constraint::MinLen, format!("length {len} is less than {min}"));
        }
        self
    }

    /// The field (string, sequence or map) must have at most `max` elements.
    pub fn max_len<T: HasLength + ?Sized>(&mut self, field: &str, value: &T, max: usize) -> &mut Self {
        if let Some(len) = value.length().filter(|len| *len > max) {
            self.push(field, Constraint::MaxLen, format!("length {len} is greater than {max}"));
        }
        self
    }

    /// The field must look like an e-mail address. Empty or absent values pass; combine with
    /// `required` to reject them.
    pub fn email<T: AsText + ?Sized>(&mut self, field: &str, value: &T) -> &mut Self {
        match value.as_text() {
            Some(text) if !text.is_empty() && !EMAIL.is_match(text) => {
                self.push(field, Constraint::Email, format!("{text:?} is not a valid e-mail address"));
            }
            _ => {}
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn into_vec(self) -> Vec<FieldViolation> {
        self.violations
    }

    /// Returns `Ok(())` when nothing was violated, otherwise a
    /// [`DocumentStoreError::ValidationFailed`] listing every violation.
    pub fn into_result(self) -> DocumentStoreResult<()> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(DocumentStoreError::ValidationFailed(self.violations))
        }
    }
}

/// Values that have a zero ("unset") state.
pub trait IsZero {
    fn is_zero(&self) -> bool;
}

macro_rules! impl_numeric {
    ($($ty:ty),*) => {$(
        impl IsZero for $ty {
            fn is_zero(&self) -> bool {
                *self == (0 as $ty)
            }
        }

        impl AsNumber for $ty {
            fn as_number(&self) -> Option<f64> {
                Some(*self as f64)
            }
        }
    )*};
}

impl_numeric!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl IsZero for bool {
    fn is_zero(&self) -> bool {
        !*self
    }
}

impl IsZero for str {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl IsZero for String {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T> IsZero for Vec<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V, S> IsZero for HashMap<K, V, S> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V> IsZero for BTreeMap<K, V> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<T> IsZero for Option<T> {
    fn is_zero(&self) -> bool {
        self.is_none()
    }
}

impl IsZero for bson::oid::ObjectId {
    fn is_zero(&self) -> bool {
        self.bytes() == [0u8; 12]
    }
}

impl IsZero for bson::DateTime {
    fn is_zero(&self) -> bool {
        self.timestamp_millis() == 0
    }
}

impl IsZero for bson::Uuid {
    fn is_zero(&self) -> bool {
        self.bytes() == [0u8; 16]
    }
}

impl<Tz: chrono::TimeZone> IsZero for chrono::DateTime<Tz> {
    fn is_zero(&self) -> bool {
        self.timestamp_millis() == 0
    }
}

/// Values that can be checked against a numeric range.
pub trait AsNumber {
    fn as_number(&self) -> Option<f64>;
}

impl<T: AsNumber> AsNumber for Option<T> {
    fn as_number(&self) -> Option<f64> {
        self.as_ref().and_then(AsNumber::as_number)
    }
}

/// Values with a length: strings (in characters), sequences and maps.
pub trait HasLength {
    fn length(&self) -> Option<usize>;
}

impl HasLength for str {
    fn length(&self) -> Option<usize> {
        Some(self.chars().count())
    }
}

impl HasLength for String {
    fn length(&self) -> Option<usize> {
        Some(self.chars().count())
    }
}

impl<T> HasLength for Vec<T> {
    fn length(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<T, S> HasLength for HashSet<T, S> {
    fn length(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<K, V, S> HasLength for HashMap<K, V, S> {
    fn length(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<K, V> HasLength for BTreeMap<K, V> {
    fn length(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<T: HasLength> HasLength for Option<T> {
    fn length(&self) -> Option<usize> {
        self.as_ref().and_then(HasLength::length)
    }
}

/// Values that can be checked against a text format.
pub trait AsText {
    fn as_text(&self) -> Option<&str>;
}

impl AsText for str {
    fn as_text(&self) -> Option<&str> {
        Some(self)
    }
}

impl AsText for String {
    fn as_text(&self) -> Option<&str> {
        Some(self)
    }
}

impl<T: AsText> AsText for Option<T> {
    fn as_text(&self) -> Option<&str> {
        self.as_ref().and_then(AsText::as_text)
    }
}

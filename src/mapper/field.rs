//! Record fields and the values that can be assigned to them.
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use thiserror::Error;

/// Semantic type of a record field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    DateTime,
    Decimal,
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::DateTime => "datetime",
            Self::Decimal => "decimal",
        };
        write!(f, "{}", name)
    }
}

/// A coerced cell value on its way into a field.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(NaiveDateTime),
    Decimal(Decimal),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Boolean(_) => FieldType::Boolean,
            Self::Byte(_) => FieldType::Byte,
            Self::Short(_) => FieldType::Short,
            Self::Int(_) => FieldType::Int,
            Self::Long(_) => FieldType::Long,
            Self::Float(_) => FieldType::Float,
            Self::Double(_) => FieldType::Double,
            Self::String(_) => FieldType::String,
            Self::DateTime(_) => FieldType::DateTime,
            Self::Decimal(_) => FieldType::Decimal,
        }
    }

    fn mismatch<T: FromFieldValue>(self) -> FieldValueError {
        FieldValueError::TypeMismatchError {
            expected: T::FIELD_TYPE,
            actual: self.field_type(),
        }
    }
}

#[derive(Error, Clone, Debug, PartialEq)]
pub enum FieldValueError {
    #[error("Cannot convert {actual} value to {expected}")]
    TypeMismatchError { expected: FieldType, actual: FieldType },

    #[error("Invalid decimal value '{0}'")]
    DecimalError(String),

    #[error("Invalid date format '{0}'")]
    DateFormatError(String),

    #[error("Cannot assign field '{0}': {1}")]
    AccessError(String, Box<FieldValueError>),
}

/// Conversion from a [`FieldValue`] into a field's Rust type.
///
/// Integer and floating-point fields also accept narrower values (an `i8`
/// error code can land in an `i32` field); no narrowing conversion happens here.
pub trait FromFieldValue: Sized {
    const FIELD_TYPE: FieldType;

    fn from_field_value(value: FieldValue) -> Result<Self, FieldValueError>;
}

macro_rules! impl_from_field_value {
    ($target:ty, $field_type:ident, [$($variant:ident),*]) => {
        impl FromFieldValue for $target {
            const FIELD_TYPE: FieldType = FieldType::$field_type;

            #[allow(clippy::cast_lossless, clippy::unnecessary_cast)]
            fn from_field_value(value: FieldValue) -> Result<Self, FieldValueError> {
                match value {
                    FieldValue::$field_type(value) => Ok(value),
                    $(FieldValue::$variant(value) => Ok(value as $target),)*
                    other => Err(other.mismatch::<Self>()),
                }
            }
        }
    };
}

impl_from_field_value!(bool, Boolean, []);
impl_from_field_value!(i8, Byte, []);
impl_from_field_value!(i16, Short, [Byte]);
impl_from_field_value!(i32, Int, [Byte, Short]);
impl_from_field_value!(i64, Long, [Byte, Short, Int]);
impl_from_field_value!(f32, Float, [Byte, Short, Int, Long]);
impl_from_field_value!(f64, Double, [Byte, Short, Int, Long, Float]);
impl_from_field_value!(String, String, []);
impl_from_field_value!(NaiveDateTime, DateTime, []);
impl_from_field_value!(Decimal, Decimal, []);

impl<T: FromFieldValue> FromFieldValue for Option<T> {
    const FIELD_TYPE: FieldType = T::FIELD_TYPE;

    fn from_field_value(value: FieldValue) -> Result<Self, FieldValueError> {
        T::from_field_value(value).map(Some)
    }
}

type Setter<T> = Box<dyn Fn(&mut T, FieldValue) -> Result<(), FieldValueError> + Send + Sync>;

/// One bound field of a record type: its name, header, type and setter.
pub struct FieldDescriptor<T> {
    name: &'static str,
    header: String,
    field_type: FieldType,
    setter: Setter<T>,
}

impl<T> FieldDescriptor<T> {
    /// Binds the column titled `header` to a field through `set`.
    /// The field type comes from the setter's value type.
    pub fn bind<V, F>(name: &'static str, header: &str, set: F) -> Self
    where
        V: FromFieldValue,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        FieldDescriptor {
            name,
            header: header.to_owned(),
            field_type: V::FIELD_TYPE,
            setter: Box::new(move |record, value| {
                set(record, V::from_field_value(value)?);
                Ok(())
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn assign(&self, record: &mut T, value: FieldValue) -> Result<(), FieldValueError> {
        (self.setter)(record, value).map_err(|e| FieldValueError::AccessError(self.name.to_owned(), Box::new(e)))
    }
}

impl<T> Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("header", &self.header)
            .field("field_type", &self.field_type)
            .finish()
    }
}

/// A type whose instances are built from sheet rows.
///
/// Records start from `Default` and receive one assignment per mapped cell.
/// Implement it with [`impl_record!`](crate::impl_record) or by listing
/// [`FieldDescriptor::bind`] calls by hand.
pub trait Record: Default {
    /// Bound fields in declaration order.
    fn fields() -> Vec<FieldDescriptor<Self>>;
}

/// Implements [`Record`] for a struct from `field => "Header"` pairs.
///
/// ```
/// #[derive(Default)]
/// struct Person {
///     name: String,
///     age: i32,
/// }
///
/// sheet_mapper::impl_record!(Person {
///     name => "Name",
///     age => "Age",
/// });
/// ```
#[macro_export]
macro_rules! impl_record {
    ($record:ty { $($field:ident => $header:expr),* $(,)? }) => {
        impl $crate::Record for $record {
            fn fields() -> Vec<$crate::FieldDescriptor<Self>> {
                vec![
                    $($crate::FieldDescriptor::bind(
                        stringify!($field),
                        $header,
                        |record: &mut Self, value| record.$field = value,
                    ),)*
                ]
            }
        }
    };
}

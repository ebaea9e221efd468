//! Checks for values that claim to be ids.

use crate::error::Error;

/// Largest value accepted as an id.
pub const MAX_ID: u64 = i64::MAX as u64;

/// Parses a decimal id string.
///
/// Only ASCII digits are accepted: no sign, no whitespace, no fraction. The
/// value must not exceed [`MAX_ID`].
pub fn parse_decimal(id: &str) -> Result<u64, Error> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::MalformedId(id.to_owned()));
    }
    match id.parse::<u64>() {
        Ok(value) if value <= MAX_ID => Ok(value),
        _ => Err(Error::MalformedId(id.to_owned())),
    }
}

/// A value that may hold an id.
pub trait IdCandidate {
    fn to_id(&self) -> Result<u64, Error>;
}

impl IdCandidate for str {
    fn to_id(&self) -> Result<u64, Error> {
        parse_decimal(self)
    }
}

impl IdCandidate for String {
    fn to_id(&self) -> Result<u64, Error> {
        parse_decimal(self)
    }
}

impl<T: IdCandidate + ?Sized> IdCandidate for &T {
    fn to_id(&self) -> Result<u64, Error> {
        (**self).to_id()
    }
}

macro_rules! impl_integer {
    ($($ty:ty),*) => {$(
        impl IdCandidate for $ty {
            fn to_id(&self) -> Result<u64, Error> {
                match u64::try_from(*self) {
                    Ok(value) if value <= MAX_ID => Ok(value),
                    _ => Err(Error::MalformedId(self.to_string())),
                }
            }
        }
    )*};
}

macro_rules! impl_float {
    ($($ty:ty),*) => {$(
        // Floats lose precision above 2^53, so none of them is an id.
        impl IdCandidate for $ty {
            fn to_id(&self) -> Result<u64, Error> {
                Err(Error::MalformedId(self.to_string()))
            }
        }
    )*};
}

impl_integer!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);
impl_float!(f32, f64);

/// Returns true when `value` is a valid id.
pub fn is_valid_id<T: IdCandidate + ?Sized>(value: &T) -> bool {
    value.to_id().is_ok()
}

//! Finds values JSON would write but could not read back as written.
//!
//! JSON has no spelling for non-finite floats (they become `null`) and no
//! way to tell `Some(None)` from `None`. [`check`] walks a value with a
//! serializer that produces nothing and fails on the first such spot.

use std::fmt;

use serde::ser::{self, Serialize};

/// Why a value cannot survive a JSON round trip.
#[derive(Debug)]
pub struct Lossy(String);

impl fmt::Display for Lossy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Lossy {}

impl ser::Error for Lossy {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

/// `Ok` when every part of `value` decodes back to itself.
pub fn check<T: Serialize + ?Sized>(value: &T) -> Result<(), Lossy> {
    value.serialize(Checker::default())
}

#[derive(Debug, Clone, Copy, Default)]
struct Checker {
    // Directly inside `Some`, where a JSON `null` would read back as `None`.
    in_some: bool,
}

impl Checker {
    fn null(self, what: &str) -> Result<(), Lossy> {
        if self.in_some {
            Err(Lossy(format!("Some({what}) is written as null and reads back as None")))
        } else {
            Ok(())
        }
    }
}

impl ser::Serializer for Checker {
    type Ok = ();
    type Error = Lossy;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn serialize_bool(self, _: bool) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_i8(self, _: i8) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_i16(self, _: i16) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_i32(self, _: i32) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_i64(self, _: i64) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_i128(self, _: i128) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_u8(self, _: u8) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_u16(self, _: u16) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_u32(self, _: u32) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_u64(self, _: u64) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_u128(self, _: u128) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> Result<(), Lossy> {
        self.serialize_f64(f64::from(v))
    }

    fn serialize_f64(self, v: f64) -> Result<(), Lossy> {
        if v.is_finite() {
            Ok(())
        } else {
            Err(Lossy(format!("non-finite float {v} is written as null")))
        }
    }

    fn serialize_char(self, _: char) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_str(self, _: &str) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_bytes(self, _: &[u8]) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_none(self) -> Result<(), Lossy> {
        self.null("None")
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<(), Lossy> {
        value.serialize(Self { in_some: true })
    }

    fn serialize_unit(self) -> Result<(), Lossy> {
        self.null("()")
    }

    fn serialize_unit_struct(self, name: &'static str) -> Result<(), Lossy> {
        self.null(name)
    }

    fn serialize_unit_variant(self, _: &'static str, _: u32, _: &'static str) -> Result<(), Lossy> {
        Ok(())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        value: &T,
    ) -> Result<(), Lossy> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        value: &T,
    ) -> Result<(), Lossy> {
        value.serialize(Self::default())
    }

    fn serialize_seq(self, _: Option<usize>) -> Result<Self, Lossy> {
        Ok(Self::default())
    }

    fn serialize_tuple(self, _: usize) -> Result<Self, Lossy> {
        Ok(Self::default())
    }

    fn serialize_tuple_struct(self, _: &'static str, _: usize) -> Result<Self, Lossy> {
        Ok(Self::default())
    }

    fn serialize_tuple_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, Lossy> {
        Ok(Self::default())
    }

    fn serialize_map(self, _: Option<usize>) -> Result<Self, Lossy> {
        Ok(Self::default())
    }

    fn serialize_struct(self, _: &'static str, _: usize) -> Result<Self, Lossy> {
        Ok(Self::default())
    }

    fn serialize_struct_variant(
        self,
        _: &'static str,
        _: u32,
        _: &'static str,
        _: usize,
    ) -> Result<Self, Lossy> {
        Ok(Self::default())
    }
}

impl ser::SerializeSeq for Checker {
    type Ok = ();
    type Error = Lossy;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Lossy> {
        value.serialize(Self::default())
    }

    fn end(self) -> Result<(), Lossy> {
        Ok(())
    }
}

impl ser::SerializeTuple for Checker {
    type Ok = ();
    type Error = Lossy;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Lossy> {
        value.serialize(Self::default())
    }

    fn end(self) -> Result<(), Lossy> {
        Ok(())
    }
}

impl ser::SerializeTupleStruct for Checker {
    type Ok = ();
    type Error = Lossy;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Lossy> {
        value.serialize(Self::default())
    }

    fn end(self) -> Result<(), Lossy> {
        Ok(())
    }
}

impl ser::SerializeTupleVariant for Checker {
    type Ok = ();
    type Error = Lossy;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Lossy> {
        value.serialize(Self::default())
    }

    fn end(self) -> Result<(), Lossy> {
        Ok(())
    }
}

impl ser::SerializeMap for Checker {
    type Ok = ();
    type Error = Lossy;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), Lossy> {
        key.serialize(Self::default())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Lossy> {
        value.serialize(Self::default())
    }

    fn end(self) -> Result<(), Lossy> {
        Ok(())
    }
}

impl ser::SerializeStruct for Checker {
    type Ok = ();
    type Error = Lossy;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _: &'static str,
        value: &T,
    ) -> Result<(), Lossy> {
        value.serialize(Self::default())
    }

    fn end(self) -> Result<(), Lossy> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for Checker {
    type Ok = ();
    type Error = Lossy;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        _: &'static str,
        value: &T,
    ) -> Result<(), Lossy> {
        value.serialize(Self::default())
    }

    fn end(self) -> Result<(), Lossy> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for marshal::lossless.
    use std::collections::BTreeMap;

    use super::*;

    /// Validates `check` for values JSON represents exactly.
    ///
    /// Assertions:
    /// - Confirms plain options, nested `Some(Some(_))`, finite floats and
    ///   containers pass.
    #[test]
    fn test_exact_values_pass() {
        assert!(check(&Some(1.5_f64)).is_ok());
        assert!(check(&Option::<u32>::None).is_ok());
        assert!(check(&Some(Some(3_u32))).is_ok());
        assert!(check(&vec![Some(1_u8), None]).is_ok());
        assert!(check(&BTreeMap::from([("a", 1.0_f32)])).is_ok());
    }

    /// Validates `check` for values JSON would change.
    ///
    /// Assertions:
    /// - Ensures NaN and infinities are reported, also when nested.
    /// - Ensures `Some(None)` and `Some(())` are reported.
    #[test]
    fn test_lossy_values_fail() {
        assert!(check(&f64::NAN).is_err());
        assert!(check(&f32::NEG_INFINITY).is_err());
        assert!(check(&vec![1.0, f64::INFINITY]).is_err());
        assert!(check(&Some(Option::<u32>::None)).is_err());
        assert!(check(&Some(Some(Option::<u32>::None))).is_err());
        let message = check(&Some(())).unwrap_err().to_string();
        assert!(message.contains("reads back as None"), "{message}");
    }
}

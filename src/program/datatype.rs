//! Data types of the language and the numeric conversion rules between them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A value type. Values are carried as raw `u64` bits everywhere: integers are
/// sign- or zero-extended according to their type, floats are stored as `f64` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Void,
    Bool,
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
    U64,
    S64,
    Float,
    Double,
}

impl DataType {
    /// Resolve a type keyword, including the `int`/`uint` aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "void" => Self::Void,
            "bool" => Self::Bool,
            "u8" => Self::U8,
            "s8" => Self::S8,
            "u16" => Self::U16,
            "s16" => Self::S16,
            "u32" | "uint" => Self::U32,
            "s32" | "int" => Self::S32,
            "u64" => Self::U64,
            "s64" => Self::S64,
            "float" => Self::Float,
            "double" => Self::Double,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::S8 => "s8",
            Self::U16 => "u16",
            Self::S16 => "s16",
            Self::U32 => "u32",
            Self::S32 => "s32",
            Self::U64 => "u64",
            Self::S64 => "s64",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    pub fn bytes(self) -> u32 {
        match self {
            Self::Void => 0,
            Self::Bool | Self::U8 | Self::S8 => 1,
            Self::U16 | Self::S16 => 2,
            Self::U32 | Self::S32 | Self::Float => 4,
            Self::U64 | Self::S64 | Self::Double => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::U8 | Self::S8 | Self::U16 | Self::S16 | Self::U32 | Self::S32 | Self::U64 | Self::S64
        )
    }

    /// Integers and bools: anything that takes part in bitwise arithmetic.
    pub fn is_integral(self) -> bool {
        self == Self::Bool || self.is_integer()
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integral() || self.is_float()
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::S8 | Self::S16 | Self::S32 | Self::S64 | Self::Float | Self::Double)
    }

    /// Integer type of the same width with the other signedness.
    fn as_unsigned(self) -> Self {
        match self {
            Self::S8 => Self::U8,
            Self::S16 => Self::U16,
            Self::S32 => Self::U32,
            Self::S64 => Self::U64,
            other => other,
        }
    }

    /// Implicit conversions are numeric widenings only: same-or-wider
    /// integers, integer to float, float to double, bool to any number.
    pub fn can_implicitly_convert_to(self, target: Self) -> bool {
        if self == target {
            return true;
        }
        match (self, target) {
            (Self::Void, _) | (_, Self::Void | Self::Bool) => false,
            (Self::Bool, _) => true,
            (from, to) if from.is_integer() && to.is_integer() => to.bytes() >= from.bytes(),
            (from, to) if from.is_integer() && to.is_float() => true,
            (Self::Float, Self::Double) => true,
            _ => false,
        }
    }

    /// Type both operands of an arithmetic or comparison operator get converted to.
    pub fn common_type(a: Self, b: Self) -> Option<Self> {
        if !a.is_numeric() || !b.is_numeric() {
            return None;
        }
        if a.is_float() || b.is_float() {
            return Some(if a == Self::Double || b == Self::Double { Self::Double } else { Self::Float });
        }
        let a = if a == Self::Bool { Self::U8 } else { a };
        let b = if b == Self::Bool { Self::U8 } else { b };
        Some(match a.bytes().cmp(&b.bytes()) {
            std::cmp::Ordering::Greater => a,
            std::cmp::Ordering::Less => b,
            std::cmp::Ordering::Equal if a == b => a,
            std::cmp::Ordering::Equal => a.as_unsigned(),
        })
    }

    /// Bring raw bits into the canonical representation for this type.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub fn normalize(self, value: u64) -> u64 {
        match self {
            Self::Void => 0,
            Self::Bool => u64::from(value != 0),
            Self::U8 => value & 0xff,
            Self::S8 => i64::from(value as u8 as i8) as u64,
            Self::U16 => value & 0xffff,
            Self::S16 => i64::from(value as u16 as i16) as u64,
            Self::U32 => value & 0xffff_ffff,
            Self::S32 => i64::from(value as u32 as i32) as u64,
            Self::U64 | Self::S64 => value,
            Self::Float => f64::from(f64::from_bits(value) as f32).to_bits(),
            Self::Double => value,
        }
    }

    /// Numeric value of canonical integer bits, respecting signedness.
    #[allow(clippy::cast_possible_wrap)]
    pub fn integer_value(self, value: u64) -> i128 {
        if self.is_signed() {
            i128::from(value as i64)
        } else {
            i128::from(value)
        }
    }

    /// Whether a constant of type `self` with canonical bits `value` can be
    /// represented by `target` without changing its numeric value.
    pub fn constant_fits(self, value: u64, target: Self) -> bool {
        if self.is_float() {
            return target.is_float();
        }
        if target.is_float() {
            return self.is_integral();
        }
        let v = self.integer_value(value);
        let (min, max): (i128, i128) = match target {
            Self::Bool => (0, 1),
            Self::U8 => (0, 0xff),
            Self::S8 => (-0x80, 0x7f),
            Self::U16 => (0, 0xffff),
            Self::S16 => (-0x8000, 0x7fff),
            Self::U32 => (0, 0xffff_ffff),
            Self::S32 => (i128::from(i32::MIN), i128::from(i32::MAX)),
            Self::U64 => (0, i128::from(u64::MAX)),
            Self::S64 => (i128::from(i64::MIN), i128::from(i64::MAX)),
            Self::Void | Self::Float | Self::Double => return false,
        };
        (min..=max).contains(&v)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Convert canonical bits of `from` into canonical bits of `to`.
///
/// Integer casts truncate, widening sign-extends according to the source type
/// (the bits already are), float to integer truncates toward zero.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss
)]
pub fn cast_value(value: u64, from: DataType, to: DataType) -> u64 {
    if from == to {
        return value;
    }
    if to == DataType::Bool {
        return if from.is_float() {
            u64::from(f64::from_bits(value) != 0.0)
        } else {
            u64::from(value != 0)
        };
    }
    match (from.is_float(), to.is_float()) {
        (true, true) => to.normalize(value),
        (true, false) => {
            let f = f64::from_bits(value).trunc();
            let bits = if to.is_signed() { f as i64 as u64 } else { f as u64 };
            to.normalize(bits)
        }
        (false, true) => {
            let f = if from.is_signed() { value as i64 as f64 } else { value as f64 };
            to.normalize(f.to_bits())
        }
        (false, false) => to.normalize(value),
    }
}

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("value {value} does not fit in an unsigned {bits}-bit integer")]
pub struct RangeError {
    pub value: i64,
    pub bits: u32,
}

/// Fixed-width unsigned integers with explicit wraparound semantics.
///
/// Every arithmetic helper wraps at the type's width; signedness only
/// matters for `signed`, `extend32` and the signed comparisons.
macro_rules! fixed_width {
    ($name:ident, $raw:ty, $signed:ty) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($raw);

        impl $name {
            pub const BITS: u32 = <$raw>::BITS;
            pub const MAX: Self = Self(<$raw>::MAX);
            pub const ZERO: Self = Self(0);

            #[must_use]
            pub const fn new(raw: $raw) -> Self {
                Self(raw)
            }

            /// # Errors
            /// Fails for negative values and values above the type's maximum.
            pub fn of(value: i64) -> Result<Self, RangeError> {
                <$raw>::try_from(value).map(Self).map_err(|_| RangeError {
                    value,
                    bits: Self::BITS,
                })
            }

            #[must_use]
            pub const fn value(self) -> $raw {
                self.0
            }

            #[must_use]
            pub const fn signed(self) -> $signed {
                self.0 as $signed
            }

            #[must_use]
            pub const fn add(self, other: Self) -> Self {
                Self(self.0.wrapping_add(other.0))
            }

            #[must_use]
            pub const fn sub(self, other: Self) -> Self {
                Self(self.0.wrapping_sub(other.0))
            }

            #[must_use]
            pub const fn mul(self, other: Self) -> Self {
                Self(self.0.wrapping_mul(other.0))
            }

            #[must_use]
            pub const fn neg(self) -> Self {
                Self(self.0.wrapping_neg())
            }

            #[must_use]
            pub fn checked_div(self, other: Self) -> Option<Self> {
                self.0.checked_div(other.0).map(Self)
            }

            #[must_use]
            pub fn checked_rem(self, other: Self) -> Option<Self> {
                self.0.checked_rem(other.0).map(Self)
            }

            /// Logical left shift; shifting by the width or more yields zero.
            #[must_use]
            pub fn shl(self, amount: u32) -> Self {
                Self(self.0.checked_shl(amount).unwrap_or(0))
            }

            /// Logical right shift; shifting by the width or more yields zero.
            #[must_use]
            pub fn shr(self, amount: u32) -> Self {
                Self(self.0.checked_shr(amount).unwrap_or(0))
            }

            #[must_use]
            pub const fn band(self, other: Self) -> Self {
                Self(self.0 & other.0)
            }

            #[must_use]
            pub const fn bor(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            #[must_use]
            pub const fn bxor(self, other: Self) -> Self {
                Self(self.0 ^ other.0)
            }

            #[must_use]
            pub const fn not(self) -> Self {
                Self(!self.0)
            }

            #[must_use]
            pub const fn signed_gt(self, other: Self) -> bool {
                self.signed() > other.signed()
            }

            #[must_use]
            pub const fn signed_ge(self, other: Self) -> bool {
                self.signed() >= other.signed()
            }

            /// Zero-extends to 32 bits.
            #[must_use]
            pub const fn u32(self) -> U32 {
                U32(self.0 as u32)
            }

            /// Replicates the sign bit into the upper bits of a 32-bit value.
            #[must_use]
            pub const fn extend32(self) -> U32 {
                U32(self.signed() as i32 as u32)
            }

            #[must_use]
            pub const fn trunc8(self) -> U8 {
                U8(self.0 as u8)
            }

            #[must_use]
            pub const fn trunc16(self) -> U16 {
                U16(self.0 as u16)
            }

            /// Zero-padded hex digits for the full width.
            #[must_use]
            pub fn hex(self) -> String {
                format!("{:0width$x}", self.0, width = (Self::BITS / 4) as usize)
            }

            /// Hex of the two's-complement magnitude with a leading `-` when negative.
            #[must_use]
            pub fn signed_hex(self) -> String {
                let signed = self.signed();
                let width = (Self::BITS / 4) as usize;
                if signed < 0 {
                    format!("-{:0width$x}", signed.unsigned_abs())
                } else {
                    format!("{:0width$x}", self.0)
                }
            }

            #[must_use]
            pub fn readable(self) -> String {
                format!("{} (0x{})", self.0, self.hex())
            }
        }

        impl From<$raw> for $name {
            fn from(raw: $raw) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for $raw {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }
    };
}

fixed_width!(U8, u8, i8);
fixed_width!(U16, u16, i16);
fixed_width!(U32, u32, i32);

/// A memory-sized value tagged with its access width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    U8(U8),
    U16(U16),
    U32(U32),
}

impl Value {
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::U8(_) => U8::BITS,
            Self::U16(_) => U16::BITS,
            Self::U32(_) => U32::BITS,
        }
    }

    /// Raw value, zero-extended.
    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::U8(v) => v.value() as u32,
            Self::U16(v) => v.value() as u32,
            Self::U32(v) => v.value(),
        }
    }

    #[must_use]
    pub const fn extend32(self) -> U32 {
        match self {
            Self::U8(v) => v.extend32(),
            Self::U16(v) => v.extend32(),
            Self::U32(v) => v,
        }
    }

    #[must_use]
    pub fn readable(self) -> String {
        match self {
            Self::U8(v) => v.readable(),
            Self::U16(v) => v.readable(),
            Self::U32(v) => v.readable(),
        }
    }
}

impl From<U8> for Value {
    fn from(value: U8) -> Self {
        Self::U8(value)
    }
}

impl From<U16> for Value {
    fn from(value: U16) -> Self {
        Self::U16(value)
    }
}

impl From<U32> for Value {
    fn from(value: U32) -> Self {
        Self::U32(value)
    }
}

/// Masks `value` to `bits`, rejecting values outside
/// `-(2^(bits-1)) ..= 2^bits - 1`.
///
/// # Errors
/// Returns `RangeError` when the value does not fit or `bits` is not 8, 16 or 32.
pub fn mask_to_width(value: i64, bits: u32) -> Result<u32, RangeError> {
    if !matches!(bits, 8 | 16 | 32) {
        return Err(RangeError { value, bits });
    }
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << bits) - 1;
    if value < min || value > max {
        return Err(RangeError { value, bits });
    }
    let mask = (1u64 << bits) - 1;
    Ok((value as u64 & mask) as u32)
}

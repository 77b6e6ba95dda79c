//! Fixed-point `decimal`/`numeric` values.
//!
//! On the wire a numeric is one sign byte (1 positive, 0 negative) followed
//! by an unsigned little-endian magnitude of 4, 8, 12 or 16 bytes. The scale
//! is not part of the payload; it comes from the column's TYPE_INFO.

use std::fmt;

use bytes::BufMut;

use crate::error::TypeError;

/// Largest precision and scale SQL Server allows.
pub const MAX_PRECISION: u8 = 38;

/// Bytes written by [`Numeric::encode`]: sign plus a 128-bit magnitude.
pub const NUMERIC_WIRE_LEN: usize = 17;

/// A signed fixed-point number: `value * 10^-scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Numeric {
    value: i128,
    scale: u8,
}

impl Numeric {
    /// A numeric with the given unscaled value and scale.
    ///
    /// `Numeric::new_with_scale(12345, 2)` is `123.45`. Scales above 38 are
    /// clamped.
    #[must_use]
    pub const fn new_with_scale(value: i128, scale: u8) -> Self {
        let scale = if scale > MAX_PRECISION {
            MAX_PRECISION
        } else {
            scale
        };
        Self { value, scale }
    }

    /// Unscaled value.
    #[must_use]
    pub const fn value(&self) -> i128 {
        self.value
    }

    /// Digits right of the decimal point.
    #[must_use]
    pub const fn scale(&self) -> u8 {
        self.scale
    }

    /// Integer part, truncated toward zero.
    #[must_use]
    pub fn int_part(&self) -> i128 {
        self.value / pow10(self.scale)
    }

    /// Fractional digits as an integer, carrying the sign of the value.
    #[must_use]
    pub fn dec_part(&self) -> i128 {
        self.value % pow10(self.scale)
    }

    /// Digits needed to hold this value at its scale, between 1 and
    /// [`MAX_PRECISION`]. Unscaled values past 38 digits report 38.
    #[must_use]
    pub fn precision(&self) -> u8 {
        let mut digits = 0u8;
        let mut rest = self.value.unsigned_abs();
        while rest > 0 {
            digits += 1;
            rest /= 10;
        }
        digits.max(self.scale).clamp(1, MAX_PRECISION)
    }

    /// Change the scale, rounding half away from zero when digits are
    /// dropped.
    pub fn rescale(&self, scale: u8) -> Result<Self, TypeError> {
        if scale > MAX_PRECISION {
            return Err(TypeError::Overflow { target: "numeric" });
        }
        let value = if scale >= self.scale {
            self.value
                .checked_mul(pow10(scale - self.scale))
                .ok_or(TypeError::Overflow { target: "numeric" })?
        } else {
            let divisor = pow10(self.scale - scale);
            let quotient = self.value / divisor;
            let remainder = self.value % divisor;
            if remainder.unsigned_abs() * 2 >= divisor.unsigned_abs() {
                quotient + self.value.signum()
            } else {
                quotient
            }
        };
        Ok(Self { value, scale })
    }

    /// Decode a sign-and-magnitude payload at the column's scale.
    pub fn decode(bytes: &[u8], scale: u8) -> Result<Self, TypeError> {
        let (sign, magnitude) = match bytes {
            [sign, rest @ ..] if matches!(rest.len(), 4 | 8 | 12 | 16) => (*sign, rest),
            _ => {
                return Err(TypeError::InvalidLength {
                    type_name: "numeric",
                    actual: bytes.len(),
                });
            }
        };

        let mut le = [0u8; 16];
        le[..magnitude.len()].copy_from_slice(magnitude);
        let magnitude = u128::from_le_bytes(le);

        let value = match sign {
            1 => i128::try_from(magnitude).map_err(|_| TypeError::Overflow { target: "numeric" })?,
            0 => 0i128
                .checked_sub_unsigned(magnitude)
                .ok_or(TypeError::Overflow { target: "numeric" })?,
            other => {
                return Err(TypeError::InvalidValue(format!(
                    "numeric sign byte {other:#04x}"
                )));
            }
        };

        Ok(Self::new_with_scale(value, scale))
    }

    /// Write the 17-byte sign-and-magnitude form.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(u8::from(self.value >= 0));
        dst.put_u128_le(self.value.unsigned_abs());
    }

    /// Convert a float, rounding to `scale` digits.
    pub fn from_f64(value: f64, scale: u8) -> Result<Self, TypeError> {
        if !value.is_finite() {
            return Err(TypeError::InvalidValue(format!("{value} is not a number")));
        }
        let scale = scale.min(MAX_PRECISION);
        let scaled = (value * 10f64.powi(i32::from(scale))).round();
        if scaled.abs() >= 1e38 {
            return Err(TypeError::Overflow { target: "numeric" });
        }
        Ok(Self::new_with_scale(scaled as i128, scale))
    }
}

const fn pow10(exp: u8) -> i128 {
    10i128.pow(exp as u32)
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value < 0 {
            f.write_str("-")?;
        }
        let divisor = pow10(self.scale).unsigned_abs();
        let magnitude = self.value.unsigned_abs();
        write!(f, "{}", magnitude / divisor)?;
        if self.scale > 0 {
            write!(
                f,
                ".{:0width$}",
                magnitude % divisor,
                width = self.scale as usize
            )?;
        }
        Ok(())
    }
}

impl From<Numeric> for f64 {
    fn from(n: Numeric) -> Self {
        n.value as f64 / 10f64.powi(i32::from(n.scale))
    }
}

macro_rules! numeric_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Numeric {
                fn from(value: $t) -> Self {
                    Self::new_with_scale(i128::from(value), 0)
                }
            }
        )*
    };
}

numeric_from_int!(i8, i16, i32, i64, u8, u16, u32, u64);

#[cfg(feature = "decimal")]
impl From<rust_decimal::Decimal> for Numeric {
    fn from(d: rust_decimal::Decimal) -> Self {
        // Decimal scale is at most 28.
        Self::new_with_scale(d.mantissa(), d.scale() as u8)
    }
}

#[cfg(feature = "decimal")]
impl TryFrom<Numeric> for rust_decimal::Decimal {
    type Error = TypeError;

    fn try_from(n: Numeric) -> Result<Self, Self::Error> {
        rust_decimal::Decimal::try_from_i128_with_scale(n.value, u32::from(n.scale))
            .map_err(|_| TypeError::Overflow { target: "Decimal" })
    }
}

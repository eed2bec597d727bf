//! 18-decimal unsigned fixed-point ratios.
//!
//! Every operation is checked. Products and quotients are computed through a
//! 256-bit intermediate so `a * b / c` only fails when the final result does
//! not fit, never because the intermediate product did.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MathError;
use crate::types::RoundingMode;

/// Number of decimals carried by a [`Fix`].
pub const FIX_DECIMALS: u8 = 18;

/// Scale factor of a [`Fix`] (10^18).
pub const FIX_SCALE: u128 = 1_000_000_000_000_000_000;

/// Unsigned fixed-point number with 18 decimals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fix(u128);

impl Fix {
    pub const ZERO: Fix = Fix(0);
    pub const ONE: Fix = Fix(FIX_SCALE);
    pub const MAX: Fix = Fix(u128::MAX);

    /// Wrap an already-scaled value.
    pub const fn from_bits(bits: u128) -> Self {
        Fix(bits)
    }

    /// The underlying scaled value.
    pub const fn bits(self) -> u128 {
        self.0
    }

    pub fn from_int(value: u128) -> Result<Self, MathError> {
        value
            .checked_mul(FIX_SCALE)
            .map(Fix)
            .ok_or(MathError::Overflow)
    }

    /// Convert a raw token quantity with `decimals` decimals into the ratio domain.
    pub fn from_raw(amount: u128, decimals: u8) -> Result<Self, MathError> {
        if decimals <= FIX_DECIMALS {
            let factor = pow10(FIX_DECIMALS - decimals)?;
            amount.checked_mul(factor).map(Fix).ok_or(MathError::Overflow)
        } else {
            let divisor = pow10(decimals - FIX_DECIMALS)?;
            Ok(Fix(amount / divisor))
        }
    }

    /// Convert into a raw token quantity with `decimals` decimals.
    pub fn to_raw(self, decimals: u8, rounding: RoundingMode) -> Result<u128, MathError> {
        if decimals <= FIX_DECIMALS {
            let divisor = pow10(FIX_DECIMALS - decimals)?;
            mul_div(self.0, 1, divisor, rounding)
        } else {
            let factor = pow10(decimals - FIX_DECIMALS)?;
            self.0.checked_mul(factor).ok_or(MathError::Overflow)
        }
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Fix) -> Result<Fix, MathError> {
        self.0
            .checked_add(other.0)
            .map(Fix)
            .ok_or(MathError::Overflow)
    }

    pub fn checked_sub(self, other: Fix) -> Result<Fix, MathError> {
        self.0
            .checked_sub(other.0)
            .map(Fix)
            .ok_or(MathError::Underflow)
    }

    /// `self - other`, clamped at zero.
    pub fn saturating_sub(self, other: Fix) -> Fix {
        Fix(self.0.saturating_sub(other.0))
    }

    pub fn mul(self, other: Fix, rounding: RoundingMode) -> Result<Fix, MathError> {
        mul_div(self.0, other.0, FIX_SCALE, rounding).map(Fix)
    }

    pub fn div(self, other: Fix, rounding: RoundingMode) -> Result<Fix, MathError> {
        mul_div(self.0, FIX_SCALE, other.0, rounding).map(Fix)
    }

    /// `self * numerator / denominator` in one rounding step.
    pub fn mul_div(self, numerator: Fix, denominator: Fix, rounding: RoundingMode) -> Result<Fix, MathError> {
        if denominator.is_zero() {
            return Err(MathError::DivisionByZero);
        }
        let product = U256::from(self.0) * U256::from(numerator.0);
        let divisor = U256::from(denominator.0);
        round_quotient(product, divisor, rounding).map(Fix)
    }

    /// Divide by an integer count.
    pub fn div_int(self, count: u128, rounding: RoundingMode) -> Result<Fix, MathError> {
        mul_div(self.0, 1, count, rounding).map(Fix)
    }

    pub fn min(self, other: Fix) -> Fix {
        if self <= other { self } else { other }
    }

    pub fn max(self, other: Fix) -> Fix {
        if self >= other { self } else { other }
    }
}

/// `a * b / c` with the requested rounding, through a 256-bit intermediate.
pub fn mul_div(a: u128, b: u128, c: u128, rounding: RoundingMode) -> Result<u128, MathError> {
    if c == 0 {
        return Err(MathError::DivisionByZero);
    }
    round_quotient(U256::from(a) * U256::from(b), U256::from(c), rounding)
}

fn round_quotient(numerator: U256, divisor: U256, rounding: RoundingMode) -> Result<u128, MathError> {
    let quotient = numerator / divisor;
    let remainder = numerator % divisor;

    let bump = match rounding {
        RoundingMode::Floor => false,
        RoundingMode::Ceil => !remainder.is_zero(),
        RoundingMode::Round => remainder * U256::from(2u8) >= divisor,
    };

    let quotient = u128::try_from(quotient).map_err(|_| MathError::Overflow)?;
    if bump {
        quotient.checked_add(1).ok_or(MathError::Overflow)
    } else {
        Ok(quotient)
    }
}

fn pow10(exp: u8) -> Result<u128, MathError> {
    10u128.checked_pow(exp as u32).ok_or(MathError::Overflow)
}

impl fmt::Display for Fix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let int = self.0 / FIX_SCALE;
        let frac = self.0 % FIX_SCALE;
        if frac == 0 {
            return write!(f, "{}", int);
        }
        let digits = format!("{:018}", frac);
        write!(f, "{}.{}", int, digits.trim_end_matches('0'))
    }
}

impl FromStr for Fix {
    type Err = MathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(MathError::Parse(s.to_string()));
        }
        if frac_part.len() > FIX_DECIMALS as usize {
            return Err(MathError::Parse(format!("too many decimals in '{}'", s)));
        }

        let int: u128 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| MathError::Parse(s.to_string()))?
        };
        let frac: u128 = if frac_part.is_empty() {
            0
        } else {
            let padded = format!("{:0<18}", frac_part);
            padded
                .parse()
                .map_err(|_| MathError::Parse(s.to_string()))?
        };

        Fix::from_int(int)?.checked_add(Fix(frac))
    }
}

impl Serialize for Fix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Fix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Int(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Repr::Int(n) => Fix::from_int(n as u128).map_err(serde::de::Error::custom),
        }
    }
}

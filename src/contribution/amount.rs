//! Fixed-point monetary amounts.
//!
//! Revenue is accumulated from thousands of tiny pool deltas, so amounts are
//! stored as an integer count of 10^-12 units (one piconero for Monero)
//! instead of binary floating point. Conversions to `f64` only happen at the
//! edges: configuration factors and the external economy deposit.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;
use thiserror::Error;

/// Number of decimal places carried by [`Amount`].
pub const DECIMALS: u32 = 12;

const SCALE: i128 = 10_i128.pow(DECIMALS);

/// A signed fixed-point amount with 12 decimal places.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i128);

/// Errors from parsing or converting amounts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid amount '{0}'")]
    InvalidFormat(String),

    #[error("amount '{0}' has more than 12 decimal places")]
    TooPrecise(String),

    #[error("amount is not a finite number")]
    NotFinite,

    #[error("unsupported number of coin decimals: {0}")]
    UnsupportedDecimals(u32),
}

impl Amount {
    pub const ZERO: Self = Self(0);

    /// Create from raw 10^-12 units.
    pub const fn from_units(units: i128) -> Self {
        Self(units)
    }

    /// Raw 10^-12 units.
    pub const fn units(&self) -> i128 {
        self.0
    }

    /// Create from a whole number of coins.
    pub const fn from_whole(coins: i64) -> Self {
        Self(coins as i128 * SCALE)
    }

    /// Convert an atomic pool value (e.g. piconero, satoshi) with the given
    /// number of coin decimals. Digits beyond 12 decimals are truncated.
    pub fn from_atomic(value: u64, decimals: u32) -> Result<Self, AmountError> {
        if decimals > 18 {
            return Err(AmountError::UnsupportedDecimals(decimals));
        }
        let value = value as i128;
        if decimals <= DECIMALS {
            Ok(Self(value * 10_i128.pow(DECIMALS - decimals)))
        } else {
            Ok(Self(value / 10_i128.pow(decimals - DECIMALS)))
        }
    }

    /// Convert from a floating point value, rounding to the nearest unit.
    pub fn from_f64(value: f64) -> Result<Self, AmountError> {
        if !value.is_finite() {
            return Err(AmountError::NotFinite);
        }
        // Round through the decimal representation so 0.1 becomes exactly 0.1.
        format!("{:.12}", value).parse()
    }

    pub fn to_f64(&self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub const fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Multiply by a fractional factor, truncating toward zero.
    pub fn mul_factor(&self, factor: Amount) -> Self {
        match self.0.checked_mul(factor.0) {
            Some(product) => Self(product / SCALE),
            // Only reachable with absurd magnitudes; fall back to the slower split.
            None => Self((self.0 / SCALE) * factor.0 + (self.0 % SCALE) * factor.0 / SCALE),
        }
    }

    /// Split into `parts` shares that sum exactly to `self`.
    ///
    /// The remainder units are handed out one each to the leading shares.
    pub fn split_even(&self, parts: usize) -> Vec<Amount> {
        if parts == 0 {
            return Vec::new();
        }
        let n = parts as i128;
        let base = self.0 / n;
        let remainder = (self.0 % n).unsigned_abs() as usize;
        let step = self.0.signum();
        (0..parts)
            .map(|i| {
                if i < remainder {
                    Self(base + step)
                } else {
                    Self(base)
                }
            })
            .collect()
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || AmountError::InvalidFormat(s.to_string());

        let (negative, digits) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            Some(_) => (false, trimmed),
            None => return Err(invalid()),
        };

        let (whole, fraction) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        if fraction.len() > DECIMALS as usize {
            // Trailing zeros beyond the supported precision are harmless.
            if fraction[DECIMALS as usize..].bytes().any(|b| b != b'0') {
                return Err(AmountError::TooPrecise(s.to_string()));
            }
        }

        let whole_units: i128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let fraction = &fraction[..fraction.len().min(DECIMALS as usize)];
        let fraction_units: i128 = if fraction.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", fraction, width = DECIMALS as usize);
            padded.parse().map_err(|_| invalid())?
        };

        let units = whole_units
            .checked_mul(SCALE)
            .and_then(|w| w.checked_add(fraction_units))
            .ok_or_else(invalid)?;

        Ok(Self(if negative { -units } else { units }))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / SCALE as u128;
        let fraction = format!("{:0width$}", abs % SCALE as u128, width = DECIMALS as usize);
        let fraction = fraction.trim_end_matches('0');
        let fraction = if fraction.is_empty() { "0" } else { fraction };
        write!(f, "{}{}.{}", sign, whole, fraction)
    }
}

impl Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Amount {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + *x)
    }
}

// Stored as a decimal string so contribution files stay exact and readable.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                Ok(Amount::from_whole(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                i64::try_from(v)
                    .map(Amount::from_whole)
                    .map_err(|_| E::custom("amount out of range"))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
                Amount::from_f64(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

impl From<AmountError> for crate::error::MinerHatError {
    fn from(err: AmountError) -> Self {
        Self::InvalidAmount(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(amt("1").to_string(), "1.0");
        assert_eq!(amt("1.5").to_string(), "1.5");
        assert_eq!(amt("-2.25").to_string(), "-2.25");
        assert_eq!(amt(".5").to_string(), "0.5");
        assert_eq!(amt("0.000000000001").units(), 1);
        assert_eq!(amt("3.10000000000000").to_string(), "3.1");
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<Amount>().is_err());
        assert!("abc".parse::<Amount>().is_err());
        assert!("1.2.3".parse::<Amount>().is_err());
        assert!("-".parse::<Amount>().is_err());
        assert!("1e5".parse::<Amount>().is_err());
        assert!(matches!(
            "0.0000000000001".parse::<Amount>(),
            Err(AmountError::TooPrecise(_))
        ));
    }

    #[test]
    fn test_no_drift_over_many_small_deltas() {
        let tick = amt("0.000001");
        let total: Amount = (0..1_000_000).map(|_| tick).sum();
        assert_eq!(total, Amount::from_whole(1));
    }

    #[test]
    fn test_from_atomic() {
        // 1.5 XMR in piconero
        assert_eq!(
            Amount::from_atomic(1_500_000_000_000, 12).unwrap(),
            amt("1.5")
        );
        // 0.5 BTC in satoshi
        assert_eq!(Amount::from_atomic(50_000_000, 8).unwrap(), amt("0.5"));
        // 18 decimals truncates below 1e-12
        assert_eq!(
            Amount::from_atomic(1_000_000_000_000_000_001, 18).unwrap(),
            Amount::from_whole(1)
        );
        assert!(Amount::from_atomic(1, 19).is_err());
    }

    #[test]
    fn test_from_f64() {
        assert_eq!(Amount::from_f64(0.1).unwrap(), amt("0.1"));
        assert_eq!(Amount::from_f64(-3.75).unwrap(), amt("-3.75"));
        assert!(Amount::from_f64(f64::NAN).is_err());
        assert!(Amount::from_f64(f64::INFINITY).is_err());
    }

    #[test]
    fn test_mul_factor() {
        assert_eq!(amt("10").mul_factor(amt("0.8")), amt("8"));
        assert_eq!(amt("1").mul_factor(amt("1")), amt("1"));
        assert_eq!(amt("0.000000000003").mul_factor(amt("0.5")).units(), 1);
    }

    #[test]
    fn test_split_even_sums_exactly() {
        let total = Amount::from_units(10);
        let shares = total.split_even(3);
        assert_eq!(shares, vec![
            Amount::from_units(4),
            Amount::from_units(3),
            Amount::from_units(3)
        ]);
        assert_eq!(shares.iter().sum::<Amount>(), total);

        let negative = Amount::from_units(-10).split_even(3);
        assert_eq!(negative.iter().sum::<Amount>(), Amount::from_units(-10));

        assert!(total.split_even(0).is_empty());
    }

    #[test]
    fn test_serde_roundtrip_as_string() {
        let json = serde_json::to_string(&amt("1.25")).unwrap();
        assert_eq!(json, "\"1.25\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amt("1.25"));
    }

    #[test]
    fn test_deserialize_from_numbers() {
        let from_float: Amount = serde_json::from_str("0.001").unwrap();
        assert_eq!(from_float, amt("0.001"));
        let from_int: Amount = serde_json::from_str("7").unwrap();
        assert_eq!(from_int, Amount::from_whole(7));
    }
}

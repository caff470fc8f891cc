//! Exact decimal amounts parsed from Kubernetes quantity strings.
//!
//! Quotas are added and subtracted across many nodes and passes, so amounts
//! are kept as decimals rather than floats. The only lossy step is
//! [`Amount::scale_by`], used when deriving entitlement from multipliers.

use core::error::Error;
use std::fmt;
use std::ops::Add;
use std::ops::AddAssign;
use std::ops::Neg;
use std::ops::Sub;
use std::ops::SubAssign;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;

/// Errors raised while parsing a quantity string.
#[derive(Debug, Clone, PartialEq, derive_more::Display)]
pub enum QuantityError {
    #[display("quantity is empty")]
    Empty,
    #[display("invalid number in quantity `{input}`")]
    InvalidNumber { input: String },
    #[display("unknown suffix `{suffix}` in quantity `{input}`")]
    UnknownSuffix { input: String, suffix: String },
    #[display("quantity `{input}` is out of range")]
    OutOfRange { input: String },
}

impl Error for QuantityError {}

/// A signed, exact resource amount in base units (cores, bytes, ...).
///
/// Equality and ordering are by value: `1` and `1000m` are the same amount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    pub fn from_decimal(value: Decimal) -> Self {
        Self(value)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        !self.0.is_zero() && self.0.is_sign_positive()
    }

    pub fn is_negative(&self) -> bool {
        !self.0.is_zero() && self.0.is_sign_negative()
    }

    /// Multiplies by a float factor, truncating toward zero at the amount's
    /// own decimal scale.
    ///
    /// A factor that cannot be represented as a decimal (NaN, infinities) or a
    /// product that overflows leaves the amount unchanged.
    pub fn scale_by(self, factor: f64) -> Self {
        let Some(factor) = Decimal::from_f64(factor) else {
            return self;
        };
        let scale = self.0.scale();
        match self.0.checked_mul(factor) {
            Some(product) => Self(product.round_dp_with_strategy(scale, RoundingStrategy::ToZero)),
            None => self,
        }
    }

    /// Lossy conversion for metrics reporting.
    pub fn as_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(f64::NAN)
    }
}

impl FromStr for Amount {
    type Err = QuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(QuantityError::Empty);
        }

        let split = trimmed
            .char_indices()
            .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '+' || *c == '-'))))
            .map(|(i, _)| i)
            .unwrap_or(trimmed.len());
        let (number, suffix) = trimmed.split_at(split);
        let number = number.strip_prefix('+').unwrap_or(number);

        let value = Decimal::from_str(number).map_err(|_| QuantityError::InvalidNumber {
            input: input.to_string(),
        })?;
        let factor = suffix_factor(suffix).ok_or_else(|| QuantityError::UnknownSuffix {
            input: input.to_string(),
            suffix: suffix.to_string(),
        })?;

        value
            .checked_mul(factor)
            .map(Amount)
            .ok_or_else(|| QuantityError::OutOfRange {
                input: input.to_string(),
            })
    }
}

/// Multiplier for a Kubernetes quantity suffix: binary SI, decimal SI or a
/// decimal exponent such as `e3`.
fn suffix_factor(suffix: &str) -> Option<Decimal> {
    let binary = |power: u32| Decimal::from(1u64 << (10 * power));
    let factor = match suffix {
        "" => Decimal::ONE,
        "n" => Decimal::new(1, 9),
        "u" => Decimal::new(1, 6),
        "m" => Decimal::new(1, 3),
        "k" => pow10(3)?,
        "M" => pow10(6)?,
        "G" => pow10(9)?,
        "T" => pow10(12)?,
        "P" => pow10(15)?,
        "E" => pow10(18)?,
        "Ki" => binary(1),
        "Mi" => binary(2),
        "Gi" => binary(3),
        "Ti" => binary(4),
        "Pi" => binary(5),
        "Ei" => binary(6),
        other => {
            let exponent = other
                .strip_prefix('e')
                .or_else(|| other.strip_prefix('E'))?;
            pow10(exponent.parse::<i32>().ok()?)?
        }
    };
    Some(factor)
}

fn pow10(exponent: i32) -> Option<Decimal> {
    if exponent >= 0 {
        (0..exponent).try_fold(Decimal::ONE, |acc, _| acc.checked_mul(Decimal::TEN))
    } else {
        let scale = exponent.unsigned_abs();
        (scale <= 28).then(|| Decimal::new(1, scale))
    }
}

impl fmt::Display for Amount {
    /// Renders the shortest exact quantity string: a plain integer, a milli
    /// or nano value, or a decimal fraction as a last resort.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0.normalize();
        if value.is_zero() {
            return write!(f, "0");
        }
        if value.fract().is_zero() {
            return write!(f, "{value}");
        }
        for (factor, suffix) in [(pow10(3), "m"), (pow10(9), "n")] {
            if let Some(scaled) = factor.and_then(|factor| value.checked_mul(factor)) {
                if scaled.fract().is_zero() {
                    return write!(f, "{}{suffix}", scaled.normalize());
                }
            }
        }
        write!(f, "{value}")
    }
}

impl TryFrom<&Quantity> for Amount {
    type Error = QuantityError;

    fn try_from(quantity: &Quantity) -> Result<Self, Self::Error> {
        quantity.0.parse()
    }
}

impl From<Amount> for Quantity {
    fn from(amount: Amount) -> Self {
        Quantity(amount.to_string())
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Amount(Decimal::from(value))
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 += rhs.0;
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Amount) {
        self.0 -= rhs.0;
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

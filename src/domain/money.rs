use crate::error::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

/// A non-negative monetary value in a currency's major unit, fixed-point.
///
/// Wrapper around `rust_decimal::Decimal` so amounts can never be floats and
/// never go negative through the public constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, EngineError> {
        if value < Decimal::ZERO {
            return Err(EngineError::Validation(
                "monetary amount must not be negative".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// Converts a provider-reported sub-unit amount (e.g. kobo, cents) into
    /// the ledger's major-unit representation.
    pub fn from_minor_units(minor: i64, currency: Currency) -> Result<Self, EngineError> {
        if minor < 0 {
            return Err(EngineError::Validation(
                "monetary amount must not be negative".to_string(),
            ));
        }
        Ok(Self(Decimal::new(minor, currency.exponent())))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Major-unit amount expressed in the currency's smallest sub-unit,
    /// rounded to the nearest whole sub-unit.
    pub fn to_minor_units(&self, currency: Currency) -> i64 {
        use rust_decimal::prelude::ToPrimitive;
        let scale = Decimal::from(10_i64.pow(currency.exponent()));
        (self.0 * scale).round().to_i64().unwrap_or(i64::MAX)
    }

    pub fn abs_diff(&self, other: Money) -> Decimal {
        (self.0 - other.0).abs()
    }

    pub fn saturating_sub(&self, other: Money) -> Money {
        if other.0 >= self.0 {
            Money::ZERO
        } else {
            Money(self.0 - other.0)
        }
    }
}

impl TryFrom<Decimal> for Money {
    type Error = EngineError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    USD,
    EUR,
    GBP,
    NGN,
    KES,
    GHS,
    ZAR,
    TZS,
    UGX,
    XOF,
    XAF,
}

impl Currency {
    /// ISO 4217 minor-unit exponent. UGX, XOF and XAF have no sub-unit.
    pub fn exponent(&self) -> u32 {
        match self {
            Currency::UGX | Currency::XOF | Currency::XAF => 0,
            _ => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::NGN => "NGN",
            Currency::KES => "KES",
            Currency::GHS => "GHS",
            Currency::ZAR => "ZAR",
            Currency::TZS => "TZS",
            Currency::UGX => "UGX",
            Currency::XOF => "XOF",
            Currency::XAF => "XAF",
        }
    }
}

impl FromStr for Currency {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "NGN" => Ok(Currency::NGN),
            "KES" => Ok(Currency::KES),
            "GHS" => Ok(Currency::GHS),
            "ZAR" => Ok(Currency::ZAR),
            "TZS" => Ok(Currency::TZS),
            "UGX" => Ok(Currency::UGX),
            "XOF" => Ok(Currency::XOF),
            "XAF" => Ok(Currency::XAF),
            other => Err(EngineError::Validation(format!(
                "unknown currency code: {other}"
            ))),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

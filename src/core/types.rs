// Strong types for on-chain values - addresses, transaction hashes, USDC amounts

use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Number of decimal places in the settlement token's fixed-point representation.
pub const USDC_DECIMALS: u32 = 6;

const USDC_SCALE: u128 = 1_000_000;

/// A checksummed-or-not EVM wallet/contract address, stored lowercased so that
/// equality and map lookups ignore casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Parse a `0x`-prefixed 40-hex-digit address. The stored form is lowercase.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let hex = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| anyhow!("address must start with 0x: {}", raw))?;

        if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow!("invalid wallet address: {}", raw));
        }

        Ok(Address(format!("0x{}", hex.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque transaction hash returned by ledger writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl TxHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// USDC amount in 6-decimal fixed point (1 USDC = 1_000_000 units).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Usdc(pub u128);

impl Usdc {
    pub const ZERO: Usdc = Usdc(0);

    /// Maximum representable amount, used for unlimited allowance approvals so
    /// members are not re-prompted on every purchase.
    pub const MAX: Usdc = Usdc(u128::MAX);

    pub fn from_units(units: u128) -> Self {
        Usdc(units)
    }

    /// Convert a decimal price (e.g. a group's monthly price) into token units.
    /// Negative or non-finite inputs map to zero, matching how group prices are
    /// reconciled before they reach the settlement path.
    pub fn from_decimal(value: f64) -> Self {
        if !value.is_finite() || value <= 0.0 {
            return Usdc::ZERO;
        }
        Usdc((value * USDC_SCALE as f64).round() as u128)
    }

    /// Parse a decimal string with at most six fractional digits, the same
    /// shape users type into a price field.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("empty amount"));
        }

        let (whole, frac) = match trimmed.split_once('.') {
            Some((w, f)) => (w, f),
            None => (trimmed, ""),
        };

        if frac.len() > USDC_DECIMALS as usize {
            return Err(anyhow!("amount has more than {} decimals: {}", USDC_DECIMALS, raw));
        }

        let whole_units: u128 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| anyhow!("invalid amount: {}", raw))?
        };

        let mut frac_units: u128 = 0;
        if !frac.is_empty() {
            frac_units = frac
                .parse()
                .map_err(|_| anyhow!("invalid amount: {}", raw))?;
            for _ in frac.len()..USDC_DECIMALS as usize {
                frac_units *= 10;
            }
        }

        whole_units
            .checked_mul(USDC_SCALE)
            .and_then(|w| w.checked_add(frac_units))
            .map(Usdc)
            .ok_or_else(|| anyhow!("amount out of range: {}", raw))
    }

    pub fn units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Usdc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / USDC_SCALE;
        let frac = self.0 % USDC_SCALE;
        if frac == 0 {
            write!(f, "{} USDC", whole)
        } else {
            let frac_str = format!("{:06}", frac);
            write!(f, "{}.{} USDC", whole, frac_str.trim_end_matches('0'))
        }
    }
}

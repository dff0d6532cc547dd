//! Input validation at the boundary between untrusted requests and the
//! ledger. Values that pass come out finite, bounded and rounded to a
//! fixed precision, so downstream arithmetic never sees NaN, infinities
//! or absurd magnitudes.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::domain::entities::trade::TradeKind;
use crate::domain::errors::ValidationError;
use crate::domain::value_objects::price::Price;
use crate::domain::value_objects::quantity::Quantity;

pub const MIN_QUANTITY: f64 = 1e-8;
pub const MAX_QUANTITY: f64 = 1e9;
pub const MIN_PRICE: f64 = 0.01;
pub const MAX_PRICE: f64 = 1e9;
pub const MAX_TRADE_VALUE: f64 = 1e10;
pub const MAX_BALANCE: f64 = 1e11;
pub const MAX_SYMBOL_LENGTH: usize = 10;

pub const DEFAULT_QUERY_LIMIT: i64 = 100;

static RESERVED_SYMBOLS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["NULL", "NONE", "CASH", "USD", "SYSTEM", "ADMIN", "TEST"]
        .into_iter()
        .collect()
});

fn round_to_places(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round_ties_even() / factor
}

pub struct TradeValidator;

impl TradeValidator {
    /// Validate and normalize a trade quantity. `allow_zero` is for read
    /// paths that inspect a position without trading.
    pub fn quantity(raw: f64, allow_zero: bool) -> Result<Quantity, ValidationError> {
        if !raw.is_finite() {
            return Err(ValidationError::InvalidQuantity(format!(
                "quantity must be a finite number, got {raw}"
            )));
        }
        if raw < 0.0 {
            return Err(ValidationError::InvalidQuantity(format!(
                "quantity must not be negative, got {raw}"
            )));
        }
        if raw == 0.0 {
            if allow_zero {
                return Quantity::new(0.0);
            }
            return Err(ValidationError::InvalidQuantity(
                "quantity must be greater than zero".to_string(),
            ));
        }
        if raw < MIN_QUANTITY {
            return Err(ValidationError::InvalidQuantity(format!(
                "quantity {raw} is below the minimum of {MIN_QUANTITY}"
            )));
        }
        if raw > MAX_QUANTITY {
            return Err(ValidationError::InvalidQuantity(format!(
                "quantity {raw} exceeds the maximum of {MAX_QUANTITY}"
            )));
        }
        Quantity::new(round_to_places(raw, 8))
    }

    pub fn price(raw: f64) -> Result<Price, ValidationError> {
        if !raw.is_finite() {
            return Err(ValidationError::InvalidPrice(format!(
                "price must be a finite number, got {raw}"
            )));
        }
        if raw < MIN_PRICE {
            return Err(ValidationError::InvalidPrice(format!(
                "price {raw} is below the minimum of {MIN_PRICE}"
            )));
        }
        if raw > MAX_PRICE {
            return Err(ValidationError::InvalidPrice(format!(
                "price {raw} exceeds the maximum of {MAX_PRICE}"
            )));
        }
        Price::new(round_to_places(raw, 8))
    }

    /// Notional value guard, applied after quantity and price pass on
    /// their own.
    pub fn trade_value(quantity: Quantity, price: Price) -> Result<f64, ValidationError> {
        let value = quantity.value() * price.value();
        if !value.is_finite() || value > MAX_TRADE_VALUE {
            return Err(ValidationError::TradeValueExceeded {
                value,
                max: MAX_TRADE_VALUE,
            });
        }
        Ok(value)
    }

    /// Only buy and sell come in from the outside; settlements are
    /// produced internally by the expiration sweep.
    pub fn trade_type(raw: &str) -> Result<TradeKind, ValidationError> {
        match TradeKind::parse(raw) {
            Some(TradeKind::Buy) => Ok(TradeKind::Buy),
            Some(TradeKind::Sell) => Ok(TradeKind::Sell),
            _ => Err(ValidationError::InvalidTradeType(format!(
                "trade type must be 'buy' or 'sell', got '{raw}'"
            ))),
        }
    }

    pub fn balance(raw: f64) -> Result<f64, ValidationError> {
        if !raw.is_finite() {
            return Err(ValidationError::InvalidBalance(format!(
                "balance must be a finite number, got {raw}"
            )));
        }
        if raw < 0.0 {
            return Err(ValidationError::InvalidBalance(format!(
                "balance must not be negative, got {raw}"
            )));
        }
        if raw > MAX_BALANCE {
            return Err(ValidationError::InvalidBalance(format!(
                "balance {raw} exceeds the maximum of {MAX_BALANCE}"
            )));
        }
        Ok(round_to_places(raw, 2))
    }
}

pub struct SymbolValidator;

impl SymbolValidator {
    /// Normalize and validate a ticker symbol. Accepts lowercase input,
    /// rejects anything that is not 1 to 10 ASCII letters after trimming,
    /// and rejects reserved words. The whitelist shape makes injection
    /// payloads unrepresentable.
    pub fn validate(raw: &str) -> Result<String, ValidationError> {
        let symbol = raw.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(ValidationError::InvalidSymbol(
                "symbol must not be empty".to_string(),
            ));
        }
        if symbol.len() > MAX_SYMBOL_LENGTH {
            return Err(ValidationError::InvalidSymbol(format!(
                "symbol '{symbol}' exceeds {MAX_SYMBOL_LENGTH} characters"
            )));
        }
        if !symbol.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ValidationError::InvalidSymbol(format!(
                "symbol '{symbol}' must contain only letters A-Z"
            )));
        }
        if RESERVED_SYMBOLS.contains(symbol.as_str()) {
            return Err(ValidationError::InvalidSymbol(format!(
                "symbol '{symbol}' is reserved"
            )));
        }
        Ok(symbol)
    }
}

pub struct QueryValidator;

impl QueryValidator {
    /// Clamp a pagination limit into [1, max], defaulting when absent or
    /// non-positive. Query limits are a safety bound, not user input worth
    /// rejecting.
    pub fn limit(raw: Option<i64>, max: i64) -> i64 {
        match raw {
            Some(n) if n >= 1 => n.min(max),
            _ => DEFAULT_QUERY_LIMIT.min(max),
        }
    }
}

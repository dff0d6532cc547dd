use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejection reasons for untrusted trade input and business-rule checks.
///
/// Every variant is recoverable: the operation is refused with a reason and
/// no state is mutated.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum ValidationError {
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Trade type must be 'buy' or 'sell', got '{0}'")]
    InvalidTradeType(String),

    #[error("Trade value ${value:.2} exceeds maximum of ${max:.2}")]
    TradeValueExceeded { value: f64, max: f64 },

    #[error("Invalid cash balance: {0}")]
    InvalidBalance(String),

    #[error("Insufficient funds: have ${available:.2}, need ${required:.2}")]
    InsufficientFunds { available: f64, required: f64 },

    #[error("Insufficient holdings: have {held}, need {required}")]
    InsufficientHoldings { held: f64, required: f64 },

    #[error("Value must be non-negative")]
    MustBeNonNegative,

    #[error("Value must be finite")]
    MustBeFinite,
}

impl From<ValidationError> for String {
    fn from(error: ValidationError) -> Self {
        error.to_string()
    }
}

/// Errors raised by the asset lifecycle manager.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LifecycleError {
    /// Symbol generation ran out of retries. Fatal for that creation
    /// attempt; the enclosing sweep carries on.
    #[error("Symbol generation exhausted after {attempts} attempts")]
    SymbolExhaustion { attempts: u32 },
}

/// Failure modes for a single trade request, as reported to the caller.
#[derive(Debug, Error)]
pub enum TradeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Unknown asset: {0}")]
    UnknownAsset(String),

    #[error("Asset {0} is no longer tradeable")]
    AssetInactive(String),

    #[error("No price available for {0}")]
    NoPriceAvailable(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::InsufficientFunds {
            available: 100.0,
            required: 250.5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: have $100.00, need $250.50"
        );

        let err = ValidationError::InvalidTradeType("hold".to_string());
        assert!(err.to_string().contains("'hold'"));
    }

    #[test]
    fn test_validation_error_serializes_with_tag() {
        let err = ValidationError::MustBeFinite;
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("MustBeFinite"));
    }

    #[test]
    fn test_lifecycle_error_messages() {
        let err = LifecycleError::SymbolExhaustion { attempts: 100 };
        assert_eq!(
            err.to_string(),
            "Symbol generation exhausted after 100 attempts"
        );
    }

    #[test]
    fn test_trade_error_wraps_validation() {
        let err: TradeError = ValidationError::MustBeNonNegative.into();
        assert_eq!(err.to_string(), "Value must be non-negative");
    }
}

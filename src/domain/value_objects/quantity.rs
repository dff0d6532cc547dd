use crate::domain::errors::ValidationError;

/// A non-negative, finite quantity of an asset.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Quantity(f64);

impl Quantity {
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::MustBeFinite);
        }
        if value < 0.0 {
            return Err(ValidationError::MustBeNonNegative);
        }
        Ok(Quantity(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn add(&self, other: Quantity) -> Result<Quantity, ValidationError> {
        Quantity::new(self.0 + other.0)
    }

    /// Fails when `other` is larger than `self`; a quantity can never go
    /// negative.
    pub fn subtract(&self, other: Quantity) -> Result<Quantity, ValidationError> {
        Quantity::new(self.0 - other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_new_valid() {
        let qty = Quantity::new(100.0);
        assert!(qty.is_ok());
        assert_eq!(qty.unwrap().value(), 100.0);
    }

    #[test]
    fn test_quantity_new_negative() {
        assert!(Quantity::new(-5.0).is_err());
    }

    #[test]
    fn test_quantity_add() {
        let q1 = Quantity::new(10.0).unwrap();
        let q2 = Quantity::new(5.0).unwrap();
        assert_eq!(q1.add(q2).unwrap().value(), 15.0);
    }

    #[test]
    fn test_quantity_subtract_insufficient() {
        let q1 = Quantity::new(5.0).unwrap();
        let q2 = Quantity::new(10.0).unwrap();
        assert!(q1.subtract(q2).is_err());
    }
}

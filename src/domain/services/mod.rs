pub mod ledger;
pub mod lifecycle;
pub mod price_engine;
pub mod priors;
pub mod validation;

mod money;
mod secret;

pub use money::{MinorUnits, Money, MoneyConversionError, STORE_CURRENCY_CODE, STORE_CURRENCY_CODE_LOWER};
pub use secret::Secret;

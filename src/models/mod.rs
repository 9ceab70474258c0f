pub mod catalog;
pub mod checkout;
pub mod order_status;

pub use catalog::{discounted_price, CatalogProduct, ProductKind, Variation};
pub use checkout::{CheckoutQuote, ResolvedLine};
pub use order_status::OrderStatus;

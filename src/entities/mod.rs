pub mod address;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod order_status_history;
pub mod product;
pub mod product_variant;

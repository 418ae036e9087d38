// Pure pricing rules
pub mod pricing;

// Catalog mirror and stock reservation
pub mod catalog;

// Cart aggregate
pub mod cart;

// Order lifecycle
pub mod checkout;
pub mod order_status;
pub mod orders;

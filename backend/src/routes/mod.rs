pub mod cart;
pub mod products;
pub mod saved_carts;
pub mod system;

pub mod accounts;
pub mod products;

pub use accounts::AccountService;
pub use products::ProductService;

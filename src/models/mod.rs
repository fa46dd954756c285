pub mod product;
pub mod user;

pub use product::{
    Category, Condition, CreateProductInput, InventoryUpdateInput, Product, ProductResponse,
    ProductStatus, StockStatus, UpdateProductInput,
};
pub use user::{Role, User, UserResponse};

pub mod listener;
pub mod models;
pub mod pool;
pub mod repository;

pub use listener::PaymentListener;
pub use models::*;
pub use pool::DbPool;
pub use repository::Repository;

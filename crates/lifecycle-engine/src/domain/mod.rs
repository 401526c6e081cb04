pub mod customer;
pub mod membership;
pub mod notification;
pub mod package;
pub mod window;

pub use customer::*;
pub use membership::*;
pub use notification::*;
pub use package::*;
pub use window::RevenueWindow;

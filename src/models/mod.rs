pub mod balance;
pub mod payment;
pub mod trade;
pub mod user;

pub use balance::*;
pub use payment::*;
pub use trade::*;
pub use user::*;

pub mod balance;
pub mod export;
pub mod payments;
pub mod stats;
pub mod subscriptions;
pub mod trades;

pub use balance::*;
pub use export::*;
pub use payments::*;
pub use stats::*;
pub use subscriptions::*;
pub use trades::*;

pub mod dashboard_feed;

pub use dashboard_feed::{DashboardFeed, DashboardSnapshot};

pub mod binance;
pub mod monitor;
pub mod sim;
pub mod subscriptions;

pub use binance::BinanceFeed;
pub use monitor::{MonitorCommand, MonitorHandle, PriceMonitor};
pub use sim::SimFeed;
pub use subscriptions::SubscriptionTable;

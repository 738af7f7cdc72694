pub mod activity;
pub mod ai;
pub mod campaign_runner;
pub mod exporter;
pub mod metrics;
pub mod reminders;
pub mod suggestions;

pub mod bot;
pub mod config;
pub mod directory;
pub mod notifier;
pub mod query;

pub mod chrome;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod errors;
pub mod locator;
pub mod overlay;
pub mod report;
pub mod runner;
pub mod session;
pub mod tasks;
pub mod toggle;
pub mod types;

#[cfg(test)]
mod fake;

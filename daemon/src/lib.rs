pub mod advisory;
pub mod audit;
pub mod classifier;
pub mod collector;
pub mod config;
pub mod daemon;
pub mod deps;
pub mod executor;
pub mod notifier;
pub mod protocol;
pub mod safety;
pub mod scanner;
pub mod socket;

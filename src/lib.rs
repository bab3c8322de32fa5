//! # Margin Sentinel
//!
//! Continuous LP margin monitoring with a human-in-the-loop alert card
//! lifecycle.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `gateway`: LP margin data source (REST client + mock provider)
//! - `analysis`: External analysis service client for risk reports
//! - `card`: Alert card data model, state machine, and concurrent store
//! - `monitor`: Recurring monitoring loop and notification scheduling

pub mod analysis;
pub mod card;
pub mod config;
pub mod gateway;
pub mod monitor;

pub use config::Config;

pub mod config;
pub mod error;
pub mod features;
pub mod stats;
pub mod models;
pub mod scoring;
pub mod combination;
pub mod pipeline;
pub mod backtest;
pub mod tuning;
pub mod report;

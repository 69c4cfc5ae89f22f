//! IVLab Core: quant preprocessing pipeline and implied-volatility engine.
//!
//! - Date-indexed labeled tables for prices, returns, and features
//! - Forward-fill, strict date alignment, and an aggregated validation gate
//! - Log returns, √252 annualization, rolling realized volatility
//! - Train-only standardization with a leakage check, temporal splits
//! - Content-addressed Parquet cache with atomic writes
//! - ATM implied volatility from a live chain, with a freshness-gated snapshot cache
//! - Yahoo Finance, CSV, and seeded synthetic providers

pub mod config;
pub mod data;
pub mod options;
pub mod pipeline;
pub mod rng;

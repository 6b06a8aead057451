//! AQI prediction server: configuration and query API

pub mod api;
pub mod config;

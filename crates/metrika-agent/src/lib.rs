//! Metrics agent: samples the host on a poll interval and pushes the local
//! store to a metrika server on a report interval.

pub mod config;
pub mod dispatch;
pub mod scheduler;
pub mod store;

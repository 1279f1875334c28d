pub mod cache;
pub mod config;
pub mod error;
pub mod liquidplanner;
pub mod ratelimit;

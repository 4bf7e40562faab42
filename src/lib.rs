//! Staff office hours and appointment booking for the campus platform.

pub mod config;
pub mod db;
pub mod error;
pub mod graphql;
pub mod models;
pub mod scheduler;
pub mod util;

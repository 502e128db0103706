pub mod auth;
pub mod clock;
pub mod config;
pub mod contracts;
pub mod db;
pub mod error;
pub mod kinds;
pub mod models;
pub mod notifier;
pub mod pdf;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod signing;
pub mod state;
pub mod storage;
pub mod utils;

pub mod api;
pub mod attendance;
pub mod capture;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod model;
pub mod reconcile;

// Library exports for midya
// This allows integration tests and external code to use midya modules

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod provision;
pub mod routes;
pub mod social;
pub mod state;

pub mod api_types;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod logging;
pub mod registry;
pub mod routes;
pub mod service;
pub mod state;
mod store;
pub mod trade;
pub mod types;
pub mod utils;

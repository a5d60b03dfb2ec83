pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod observability;
pub mod relay;
pub mod state;
pub mod stream;
pub mod transport;

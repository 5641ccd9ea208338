pub mod api;
pub mod config;
pub mod decode;
pub mod detail;
pub mod error;
pub mod models;
pub mod pagination;
pub mod reconcile;
pub mod render;
pub mod session;
pub mod transport;
pub mod view;

#[cfg(test)]
mod testing;

//! gaia-vault: chunked, partitioned document uploads on top of a pluggable
//! blob store, with a small record persistence layer and an HTTP surface.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod records;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;

#[cfg(test)]
mod test_support;

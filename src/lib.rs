pub mod cache;
pub mod classify;
pub mod config;
pub mod data_uri;
pub mod download;
pub mod edge;
pub mod error;
pub mod fallback;
pub mod media;
pub mod router;
pub mod session;
pub mod store;
pub mod thumbnail;

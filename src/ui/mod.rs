//! Status web API

pub mod handlers;
pub mod server;

pub use server::{create_shared_snapshot, SharedSnapshot, WebServer};

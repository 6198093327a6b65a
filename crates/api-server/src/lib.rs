#![warn(clippy::unwrap_used)]

pub mod auth;
pub mod rest;
pub mod server;
pub mod stream;

pub use server::{router, ApiServer};

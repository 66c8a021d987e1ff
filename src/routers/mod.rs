//! Request routing

pub mod header_utils;
pub mod http;

pub use http::Router;

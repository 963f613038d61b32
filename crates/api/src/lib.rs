//! HTTP API for the Marcel expenses application: configuration, middleware
//! stack, route group mounting and documentation.

pub mod app;
pub mod config;
pub mod db;
pub mod middleware;

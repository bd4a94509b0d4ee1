//! The board server: projects, members and tasks behind an authenticated
//! JSON API.
//!
//! - `db`: SQLite storage and the blocking-pool handle
//! - `auth`: bearer-token callers and membership-based authorization
//! - `validation`: request payload checks
//! - `api`: axum handlers and error mapping
//! - `ws`: board change events pushed over WebSocket
//! - `server`: router assembly and lifecycle

pub mod api;
pub mod auth;
pub mod db;
pub mod models;
pub mod server;
pub mod validation;
pub mod ws;

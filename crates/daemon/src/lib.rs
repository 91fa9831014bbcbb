#![forbid(unsafe_code)]

//! Fleet daemon: HTTP transport over the dispatch coordinator, backed by an
//! in-memory or embedded SurrealDB store.

pub mod config;
pub mod db;
pub mod http;

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Shared model, safety classifier and dispatch logic for the fleet daemon,
//! its agents and the operator CLI.

pub mod api;
pub mod classifier;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod store;

mod util;

pub use util::{new_ulid, now_ms};

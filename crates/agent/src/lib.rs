#![forbid(unsafe_code)]

//! Fleet agent: registers its machine, polls for pending commands, runs them
//! through a shell and reports the output.

pub mod client;
pub mod exec_runner;
pub mod identity;
pub mod runner;

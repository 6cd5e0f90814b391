//! Library for trafficsim containing most of its core code.
//!
//! The binary only wires these pieces into processes:
//! a traffic generator and a simulated backend.

#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

pub mod backend;
pub mod client;
pub mod dispatcher;
pub mod http;
pub mod routing;
pub mod server;
pub mod utils;

//! HTTP/1.1 connection engine.
//!
//! One exclusive buffered duplex stream per connection: serialize one
//! request, parse one response, then either return to the pool (keep-alive)
//! or dispose. Response body framing is a closed set of variants selected
//! once after the headers parse.

pub mod chunked;
pub mod connection;

pub use connection::{ConnectionReturn, Http1Body, Http1Connection, ReturnHook};

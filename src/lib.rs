//! Per-phase timing of HTTP requests.
//!
//! [`trace::RequestTracer`] records when each connection used by a request
//! was acquired, resolved, connected, written and first answered.
//! [`http::client::Client`] is a small HTTP/1.1 client that raises the
//! tracer's hooks, and [`report`] renders the resulting [`trace::Stats`].

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate tracing;

pub mod app;
pub mod cli;
pub mod http;
pub mod report;
pub mod tls;
pub mod trace;

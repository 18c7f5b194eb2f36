//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

mod bitmap;
mod config;
mod error;
mod safetcp;
mod stopwatch;

pub use bitmap::Bitmap;
pub use error::BenchError;
pub use print::{logger_init, ME};
pub use stopwatch::Stopwatch;

pub(crate) use config::parse_params;
pub(crate) use safetcp::{
    resolve_addr, safe_tcp_read, tcp_connect_with_retry, tcp_write_framed,
};

//! Unified error type of the benchmark driver.

use std::error;
use std::fmt;
use std::io;
use std::net;

/// Error carrying a human-readable description only. Source errors are
/// flattened into their display strings on conversion.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BenchError(pub(crate) String);

impl BenchError {
    pub fn msg(msg: impl ToString) -> Self {
        BenchError(msg.to_string())
    }
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl error::Error for BenchError {}

/// Implements `From<X> for BenchError` for every listed source type that
/// `?` meets in this crate.
macro_rules! impl_from_error {
    ($($error:ty),+ $(,)?) => {
        $(
            impl From<$error> for BenchError {
                fn from(e: $error) -> Self {
                    BenchError(e.to_string())
                }
            }
        )+
    };
}

impl_from_error!(
    io::Error,                 // sockets
    net::AddrParseError,       // endpoint strings
    rmp_serde::encode::Error,  // outbound frames
    rmp_serde::decode::Error,  // inbound frames
    toml::de::Error,           // --params string
    ctrlc::Error,              // signal handler setup
);

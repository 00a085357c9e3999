//! DNS listeners
//!
//! Wire-facing servers for standard DNS over UDP and TCP.

mod tcp;
mod udp;

pub use tcp::*;
pub use udp::*;

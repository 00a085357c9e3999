//! DNS subsystem
//!
//! Message model, authoritative resolver, resolver chain, cache, upstream
//! forwarder, and the UDP/TCP listeners.

pub mod authority;
pub mod cache;
pub mod chain;
pub mod forwarder;
pub mod message;
pub mod server;

pub use authority::{AuthorityResolver, ResolveError, SoaSet};
pub use cache::{CacheKey, DnsCache};
pub use chain::{ResolverChain, Stage};
pub use forwarder::Forwarder;
pub use message::{AnswerRecord, DnsQuery, DnsResponse, RecordData, RecordKind, SoaData};

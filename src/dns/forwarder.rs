//! Upstream forwarder
//!
//! Stub forwarding of non-authoritative queries to the configured recursive
//! resolvers over UDP. Attempts walk the timeout schedule outer-to-inner:
//! every upstream is tried with the first timeout before any upstream is
//! retried with the next, larger one.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::message::{DnsQuery, DnsResponse};

const DNS_PORT: u16 = 53;

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("no upstream servers configured")]
    NoUpstreams,

    #[error("all upstream attempts failed")]
    Exhausted,

    #[error("invalid upstream address: {0}")]
    InvalidUpstream(String),
}

/// One upstream recursive resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub host: IpAddr,
    pub port: u16,
}

impl Upstream {
    /// Parse `host` or `host:port`
    pub fn parse(server: &str) -> Result<Self, ForwardError> {
        if let Ok(addr) = server.parse::<SocketAddr>() {
            return Ok(Self {
                host: addr.ip(),
                port: addr.port(),
            });
        }
        if let Ok(ip) = server.parse::<IpAddr>() {
            return Ok(Self {
                host: ip,
                port: DNS_PORT,
            });
        }
        // bare IPv4/IPv6 with explicit port but no bracket syntax
        if let Some((host, port)) = server.rsplit_once(':') {
            let ip = host
                .parse::<IpAddr>()
                .map_err(|_| ForwardError::InvalidUpstream(server.to_string()))?;
            let port = port
                .parse::<u16>()
                .map_err(|_| ForwardError::InvalidUpstream(server.to_string()))?;
            return Ok(Self { host: ip, port });
        }
        Err(ForwardError::InvalidUpstream(server.to_string()))
    }

    fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Forwards queries to a list of upstreams with a per-attempt timeout
/// schedule.
pub struct Forwarder {
    upstreams: Vec<Upstream>,
    timeouts: Vec<Duration>,
}

impl Forwarder {
    pub const DEFAULT_TIMEOUTS: [u64; 4] = [1, 3, 11, 30];

    pub fn new<S: AsRef<str>>(servers: &[S], timeouts: &[u64]) -> Result<Self, ForwardError> {
        let upstreams = servers
            .iter()
            .map(|s| Upstream::parse(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if upstreams.is_empty() {
            return Err(ForwardError::NoUpstreams);
        }

        let timeouts: Vec<Duration> = if timeouts.is_empty() {
            Self::DEFAULT_TIMEOUTS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect()
        } else {
            timeouts.iter().map(|s| Duration::from_secs(*s)).collect()
        };

        Ok(Self {
            upstreams,
            timeouts,
        })
    }

    /// Forward a query upstream; the first response wins
    pub async fn query(&self, query: &DnsQuery) -> Result<DnsResponse, ForwardError> {
        let query_bytes = match query.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to encode forwarded query for {}: {}", query.name, e);
                return Err(ForwardError::Exhausted);
            }
        };

        for attempt_timeout in &self.timeouts {
            for upstream in &self.upstreams {
                match self
                    .attempt(&query_bytes, upstream.socket_addr(), *attempt_timeout)
                    .await
                {
                    Ok(response) => {
                        debug!(
                            "upstream {} answered {} with {} records",
                            upstream.socket_addr(),
                            query.name,
                            response.answers.len()
                        );
                        let mut response = response;
                        response.id = query.id;
                        return Ok(response);
                    }
                    Err(e) => {
                        debug!(
                            "upstream {} failed for {} (timeout {:?}): {}",
                            upstream.socket_addr(),
                            query.name,
                            attempt_timeout,
                            e
                        );
                    }
                }
            }
        }

        warn!("all upstream attempts exhausted for {}", query.name);
        Err(ForwardError::Exhausted)
    }

    async fn attempt(
        &self,
        query_bytes: &[u8],
        server: SocketAddr,
        attempt_timeout: Duration,
    ) -> std::io::Result<DnsResponse> {
        let bind_addr: SocketAddr = if server.is_ipv6() {
            SocketAddr::new(std::net::Ipv6Addr::UNSPECIFIED.into(), 0)
        } else {
            SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), 0)
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.send_to(query_bytes, server).await?;

        let mut buf = vec![0u8; 4096];
        let (len, _) = timeout(attempt_timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "query timeout"))??;
        buf.truncate(len);

        DnsResponse::from_bytes(&buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::message::{AnswerRecord, RecordData};
    use hickory_proto::rr::RecordType;

    #[test]
    fn test_upstream_parse_variants() {
        assert_eq!(
            Upstream::parse("1.1.1.1").unwrap(),
            Upstream {
                host: "1.1.1.1".parse().unwrap(),
                port: 53
            }
        );
        assert_eq!(
            Upstream::parse("8.8.8.8:5353").unwrap(),
            Upstream {
                host: "8.8.8.8".parse().unwrap(),
                port: 5353
            }
        );
        assert_eq!(
            Upstream::parse("[2606:4700:4700::1111]:53").unwrap(),
            Upstream {
                host: "2606:4700:4700::1111".parse().unwrap(),
                port: 53
            }
        );
        assert!(Upstream::parse("not an address").is_err());
        assert!(Upstream::parse("1.1.1.1:notaport").is_err());
    }

    #[test]
    fn test_forwarder_requires_upstreams() {
        let servers: [&str; 0] = [];
        assert!(matches!(
            Forwarder::new(&servers, &[]),
            Err(ForwardError::NoUpstreams)
        ));
    }

    #[tokio::test]
    async fn test_forwarder_uses_local_upstream() {
        // stand up a tiny UDP responder that answers every query with one A
        let server_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let (len, src) = server_socket.recv_from(&mut buf).await.unwrap();
            let query = DnsQuery::from_bytes(&buf[..len]).unwrap();

            let mut response = DnsResponse::new(query.id);
            response.recursion_available = true;
            response.add_answer(AnswerRecord::new(
                query.name.clone(),
                RecordData::A("93.184.216.34".parse().unwrap()),
                60,
            ));
            let bytes = response.to_bytes(&query).unwrap();
            server_socket.send_to(&bytes, src).await.unwrap();
        });

        let forwarder =
            Forwarder::new(&[server_addr.to_string()], &[2]).unwrap();
        let query = DnsQuery::new(77, "forwarded.example.net", RecordType::A);
        let response = forwarder.query(&query).await.unwrap();

        assert_eq!(response.id, 77);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].data.value(), "93.184.216.34");
    }

    #[tokio::test]
    async fn test_forwarder_exhausts_on_silent_upstream() {
        // bind a socket that never answers
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let forwarder = Forwarder::new(&[addr.to_string()], &[1]).unwrap();
        let query = DnsQuery::new(5, "quiet.example.net", RecordType::A);

        assert!(matches!(
            forwarder.query(&query).await,
            Err(ForwardError::Exhausted)
        ));
    }
}

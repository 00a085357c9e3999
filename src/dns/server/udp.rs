//! UDP DNS listener
//!
//! Standard DNS over UDP. Each datagram is decoded, dispatched to the
//! resolver chain in its own task, and the response sent back to the source
//! address. Malformed datagrams are dropped without a reply.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::dns::chain::ResolverChain;
use crate::dns::message::DnsQuery;

pub struct UdpDnsServer {
    socket: UdpSocket,
    chain: Arc<ResolverChain>,
    bind_addr: SocketAddr,
}

impl UdpDnsServer {
    pub async fn new(bind_addr: SocketAddr, chain: Arc<ResolverChain>) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| anyhow!("failed to bind UDP socket to {}: {}", bind_addr, e))?;

        info!("UDP DNS listener bound to {}", bind_addr);

        Ok(Self {
            socket,
            chain,
            bind_addr,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| anyhow!("failed to get local address: {}", e))
    }

    /// Run the receive loop indefinitely
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("UDP DNS listener starting on {}", self.bind_addr);

        let mut buf = vec![0u8; 4096];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    let data = buf[..len].to_vec();
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_datagram(data, src).await {
                            warn!("error handling UDP query from {}: {}", src, e);
                        }
                    });
                }
                Err(e) => {
                    error!("error receiving UDP packet: {}", e);
                }
            }
        }
    }

    async fn handle_datagram(&self, data: Vec<u8>, src: SocketAddr) -> Result<()> {
        let Some(response_bytes) = Self::handle_query(&self.chain, &data).await else {
            return Ok(());
        };

        self.socket
            .send_to(&response_bytes, src)
            .await
            .map_err(|e| anyhow!("failed to send response to {}: {}", src, e))?;
        Ok(())
    }

    /// Decode, resolve, and encode one query. `None` means the datagram was
    /// malformed and should be dropped silently.
    pub async fn handle_query(chain: &ResolverChain, data: &[u8]) -> Option<Vec<u8>> {
        let query = match DnsQuery::from_bytes(data) {
            Ok(q) => q,
            Err(e) => {
                debug!("dropping malformed UDP query: {}", e);
                return None;
            }
        };

        debug!(
            "UDP query: {} <{}> (ID: {})",
            query.name, query.query_type, query.id
        );

        let response = chain.resolve(&query).await;
        match response.to_bytes(&query) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("failed to encode response for {}: {}", query.name, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewRecord};
    use crate::dns::authority::{AuthorityResolver, SoaSet};
    use crate::dns::chain::Stage;
    use crate::dns::message::{DnsResponse, RecordData};
    use hickory_proto::op::ResponseCode;
    use hickory_proto::rr::RecordType;
    use tempfile::tempdir;

    async fn test_chain() -> (Arc<ResolverChain>, Arc<Database>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("test.sqlite")).await.unwrap());
        let authority = Arc::new(AuthorityResolver::new(
            db.clone(),
            Arc::new(SoaSet::new(&["example.com"])),
            vec!["ns1.example.com".to_string()],
            300,
        ));
        let chain = Arc::new(ResolverChain::new(vec![Stage::Authority(authority)]));
        (chain, db, dir)
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let (chain, _db, _dir) = test_chain().await;
        let server = UdpDnsServer::new("127.0.0.1:0".parse().unwrap(), chain)
            .await
            .unwrap();
        assert!(server.local_addr().unwrap().port() > 0);
    }

    #[tokio::test]
    async fn test_handle_query_answers_from_store() {
        let (chain, db, _dir) = test_chain().await;
        db.records()
            .create_record(
                &NewRecord::new(RecordData::A("192.168.1.100".parse().unwrap()), 300),
                "host.example.com",
            )
            .await
            .unwrap();

        let query = DnsQuery::new(12345, "host.example.com", RecordType::A);
        let response_bytes = UdpDnsServer::handle_query(&chain, &query.to_bytes().unwrap())
            .await
            .unwrap();

        let response = DnsResponse::from_bytes(&response_bytes).unwrap();
        assert_eq!(response.id, 12345);
        assert!(response.authoritative);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].data.value(), "192.168.1.100");
    }

    #[tokio::test]
    async fn test_malformed_datagram_dropped() {
        let (chain, _db, _dir) = test_chain().await;
        let result = UdpDnsServer::handle_query(&chain, &[0u8; 7]).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_end_to_end_over_socket() {
        let (chain, db, _dir) = test_chain().await;
        db.records()
            .create_record(
                &NewRecord::new(RecordData::A("10.9.8.7".parse().unwrap()), 60),
                "wire.example.com",
            )
            .await
            .unwrap();

        let server = Arc::new(
            UdpDnsServer::new("127.0.0.1:0".parse().unwrap(), chain)
                .await
                .unwrap(),
        );
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let query = DnsQuery::new(9, "wire.example.com", RecordType::A);
        client
            .send_to(&query.to_bytes().unwrap(), server_addr)
            .await
            .unwrap();

        let mut buf = vec![0u8; 4096];
        let (len, _) = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            client.recv_from(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();

        let response = DnsResponse::from_bytes(&buf[..len]).unwrap();
        assert_eq!(response.id, 9);
        assert_eq!(response.response_code, ResponseCode::NoError);
        assert_eq!(response.answers[0].data.value(), "10.9.8.7");
    }
}

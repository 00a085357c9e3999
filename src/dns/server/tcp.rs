//! TCP DNS listener
//!
//! RFC 1035 framing: each message is prefixed with a 2-byte big-endian
//! length, and a connection may carry multiple queries. Malformed data
//! closes the connection.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::dns::chain::ResolverChain;
use crate::dns::message::DnsQuery;

pub struct TcpDnsServer {
    listener: TcpListener,
    chain: Arc<ResolverChain>,
    bind_addr: SocketAddr,
}

impl TcpDnsServer {
    pub async fn new(bind_addr: SocketAddr, chain: Arc<ResolverChain>) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| anyhow!("failed to bind TCP listener to {}: {}", bind_addr, e))?;

        info!("TCP DNS listener bound to {}", bind_addr);

        Ok(Self {
            listener,
            chain,
            bind_addr,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| anyhow!("failed to get local address: {}", e))
    }

    /// Run the accept loop indefinitely
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!("TCP DNS listener starting on {}", self.bind_addr);

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let chain = self.chain.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(chain, stream, peer_addr).await {
                            debug!("closing TCP connection from {}: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("error accepting TCP connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        chain: Arc<ResolverChain>,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<()> {
        debug!("new TCP DNS connection from {}", peer_addr);

        loop {
            let mut len_buf = [0u8; 2];
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("TCP connection closed by {}", peer_addr);
                    return Ok(());
                }
                Err(e) => return Err(anyhow!("failed to read query length: {}", e)),
            }

            let query_len = u16::from_be_bytes(len_buf) as usize;
            if query_len == 0 {
                return Err(anyhow!("zero-length query"));
            }

            let mut query_buf = vec![0u8; query_len];
            stream
                .read_exact(&mut query_buf)
                .await
                .map_err(|e| anyhow!("failed to read query data: {}", e))?;

            let query = match DnsQuery::from_bytes(&query_buf) {
                Ok(q) => q,
                Err(e) => {
                    // malformed framing payload, drop the connection
                    return Err(anyhow!("malformed query: {}", e));
                }
            };

            debug!(
                "TCP query from {}: {} <{}> (ID: {})",
                peer_addr, query.name, query.query_type, query.id
            );

            let response = chain.resolve(&query).await;
            let response_bytes = match response.to_bytes(&query) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("failed to encode response for {}: {}", query.name, e);
                    return Err(anyhow!("encode failure"));
                }
            };

            let response_len = (response_bytes.len() as u16).to_be_bytes();
            stream
                .write_all(&response_len)
                .await
                .map_err(|e| anyhow!("failed to write response length: {}", e))?;
            stream
                .write_all(&response_bytes)
                .await
                .map_err(|e| anyhow!("failed to write response data: {}", e))?;
            stream
                .flush()
                .await
                .map_err(|e| anyhow!("failed to flush response: {}", e))?;
        }
    }
}

//! Server bootstrap
//!
//! Wires configuration, the record store, the resolver chain, the DNS
//! listeners, and the authenticated REST control plane, then waits for a
//! shutdown signal.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use axum::middleware;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{BasicAuthenticator, JwtAuthenticator, SubjectRegistry};
use crate::config::AppConfig;
use crate::db::Database;
use crate::dns::server::{TcpDnsServer, UdpDnsServer};
use crate::dns::{AuthorityResolver, DnsCache, Forwarder, ResolverChain, SoaSet, Stage};
use crate::log;
use crate::web::{
    auth_middleware, records_router, serve_http, serve_https, ApiState, AuthMode, AuthState,
    TlsConfig,
};

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    log::init(config.dns.verbosity);

    println!("Starting HomeDNS...");
    info!("configuration loaded");

    let db = Arc::new(
        Database::open(&config.dns.database.sqlite.path)
            .await
            .context("failed to open record database")?,
    );
    info!(
        "record store opened at {}",
        config.dns.database.sqlite.path.display()
    );

    let soa = Arc::new(SoaSet::new(&config.dns.soa_domains));
    if soa.is_empty() {
        warn!("no SOA domains configured; no query will be answered authoritatively");
    }

    let authority = Arc::new(AuthorityResolver::new(
        db.clone(),
        soa.clone(),
        config.dns.name_servers.clone(),
        config.dns.ttl,
    ));

    let mut stages = vec![Stage::Authority(authority)];
    if config.dns.cache.enabled {
        stages.push(Stage::Cache(Arc::new(DnsCache::new())));
        info!("DNS cache enabled");
    }
    if config.dns.forwarding.enabled {
        let forwarder = Forwarder::new(
            &config.dns.forwarding.servers,
            &config.dns.forwarding.timeouts,
        )
        .context("invalid dns.forwarding configuration")?;
        stages.push(Stage::Forwarder(Arc::new(forwarder)));
        info!(
            "forwarding enabled via {:?}",
            config.dns.forwarding.servers
        );
    }
    let chain = Arc::new(ResolverChain::new(stages));

    let mut handles = Vec::new();

    let udp_addr = SocketAddr::from(([0, 0, 0, 0], config.dns.listen_udp));
    let udp = Arc::new(UdpDnsServer::new(udp_addr, chain.clone()).await?);
    handles.push(tokio::spawn(udp.run()));

    let tcp_addr = SocketAddr::from(([0, 0, 0, 0], config.dns.listen_tcp));
    let tcp = Arc::new(TcpDnsServer::new(tcp_addr, chain.clone()).await?);
    handles.push(tokio::spawn(tcp.run()));

    // authentication mode for the control plane
    let mode = if config.no_auth.enabled {
        warn!("control-plane authentication is DISABLED by configuration");
        AuthMode::Open
    } else if let Some(basic) = config.basic_auth.as_ref().filter(|b| b.enabled) {
        info!("basic authentication enabled ({})", basic.secrets.display());
        AuthMode::Basic(BasicAuthenticator::new(&basic.secrets))
    } else if config.jwt_auth.enabled {
        let registry = Arc::new(
            SubjectRegistry::open(&config.jwt_auth.subjects)
                .context("failed to open JWT subject registry")?,
        );
        info!(
            "JWT authentication enabled ({} subjects registered)",
            registry.list().len()
        );
        AuthMode::Jwt(JwtAuthenticator::new(
            registry,
            &config.jwt_auth.algorithms,
            config.jwt_auth.issuer.clone(),
            config.jwt_auth.audience.clone(),
            config.jwt_auth.leeway,
        )?)
    } else {
        bail!("authentication is not enabled; enable jwt_auth, basic_auth, or no_auth");
    };

    let auth_state = AuthState {
        mode: Arc::new(mode),
    };
    let api_state = ApiState {
        db: db.clone(),
        soa: soa.clone(),
        display_tracebacks: config.display_tracebacks,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = records_router(api_state)
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    if let Some(http) = &config.http {
        let addr = SocketAddr::from(([0, 0, 0, 0], http.listen));
        handles.push(tokio::spawn(serve_http(addr, app.clone())));
        println!("  - REST API: http://0.0.0.0:{}", http.listen);
    }

    if let Some(https) = &config.https {
        if !https.public_key.exists() || !https.private_key.exists() {
            if https.generate_keys {
                bail!(
                    "https key pair not found ({} / {}); key generation is handled by external \
                     tooling, e.g. `openssl req -x509 -newkey rsa:4096 -nodes -keyout {} -out {}`",
                    https.private_key.display(),
                    https.public_key.display(),
                    https.private_key.display(),
                    https.public_key.display(),
                );
            }
            bail!(
                "https key pair not found: {} / {}",
                https.private_key.display(),
                https.public_key.display(),
            );
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], https.listen));
        let tls = TlsConfig::new(&https.public_key, &https.private_key);
        handles.push(tokio::spawn(serve_https(addr, app.clone(), tls)));
        println!("  - REST API: https://0.0.0.0:{}", https.listen);
    }

    if config.http.is_none() && config.https.is_none() {
        info!("no HTTP/HTTPS listeners configured; REST control plane is disabled");
    }

    println!("HomeDNS started");
    println!(
        "  - DNS: udp/{} tcp/{}",
        config.dns.listen_udp, config.dns.listen_tcp
    );

    shutdown_signal().await;

    info!("shutting down HomeDNS...");
    for handle in handles {
        handle.abort();
    }
    info!("HomeDNS stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C signal");
        },
        _ = terminate => {
            info!("received SIGTERM signal");
        },
    }
}

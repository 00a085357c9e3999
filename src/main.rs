//! HomeDNS
//!
//! An authoritative DNS server for a configured set of domains, with stub
//! forwarding for everything else and a JWT-secured REST control plane for
//! dynamic record management.

mod auth;
mod bootstrap;
mod cli;
mod config;
mod db;
mod dns;
mod log;
mod web;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    cli::Cli::parse().run().await
}

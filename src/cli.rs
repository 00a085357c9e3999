//! Command-line interface
//!
//! `homedns serve` runs the server; `homedns config` dumps the merged
//! configuration; `homedns jwt` manages API subjects.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use crate::auth::SubjectRegistry;
use crate::bootstrap;
use crate::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "homedns",
    version,
    about = "Authoritative DNS server with a REST control plane"
)]
pub struct Cli {
    /// Server configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the DNS and REST servers
    Serve,
    /// Print the merged effective configuration
    Config,
    /// Manage JWT subjects
    Jwt {
        #[command(subcommand)]
        command: JwtCommand,
    },
}

#[derive(Subcommand)]
enum JwtCommand {
    /// Register a new subject for an existing public-key PEM
    Add {
        /// Public-key PEM file to install for the subject
        #[arg(long, value_name = "PEM")]
        certificate: PathBuf,
        /// Emit JSON output, useful for automation
        #[arg(long)]
        json: bool,
    },
    /// List registered subjects
    List {
        #[arg(long)]
        json: bool,
    },
    /// Remove a subject and its certificate
    Remove {
        subject: String,
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Serve => bootstrap::run(self.config.as_deref()).await,
            Command::Config => {
                let config = AppConfig::load(self.config.as_deref())?;
                println!("{}", config.to_toml_string()?);
                Ok(())
            }
            Command::Jwt { command } => jwt_admin(self.config.as_deref(), command),
        }
    }
}

fn jwt_admin(config_path: Option<&Path>, command: JwtCommand) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    let registry = SubjectRegistry::open(&config.jwt_auth.subjects)
        .with_context(|| format!("failed to open registry {}", config.jwt_auth.subjects.display()))?;

    match command {
        JwtCommand::Add { certificate, json } => {
            let pem = fs::read_to_string(&certificate).with_context(|| {
                format!("failed to read certificate {}", certificate.display())
            })?;
            let subject = registry.add_subject(&pem)?;

            if json {
                println!(
                    "{}",
                    json!({
                        "subject": subject.subject,
                        "certificate": subject.certificate,
                        "created": subject.created.to_rfc3339(),
                    })
                );
            } else {
                println!("Subject added: {}", subject.subject);
                println!("Public key installed at {:?}", subject.certificate);
                println!("Clients authenticate by signing JWTs (sub = subject id) with the matching private key.");
            }
        }
        JwtCommand::List { json } => {
            let subjects = registry.list();
            if json {
                let entries: Vec<_> = subjects
                    .iter()
                    .map(|(subject, entry)| {
                        json!({
                            "subject": subject,
                            "certificate": entry.certificate,
                            "created": entry.created.to_rfc3339(),
                        })
                    })
                    .collect();
                println!("{}", json!(entries));
            } else {
                println!("A total of [{}] JWT subjects exist", subjects.len());
                for (subject, entry) in subjects {
                    println!(
                        "{} | {} | {}",
                        subject,
                        entry.certificate.display(),
                        entry.created.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
        JwtCommand::Remove { subject, json } => match registry.remove_subject(&subject) {
            Ok(()) => {
                if json {
                    println!("{}", json!({ "ok": true, "subject": subject }));
                } else {
                    println!("Removed subject: \"{subject}\"");
                }
            }
            Err(crate::auth::AuthError::InvalidSubject) => {
                if json {
                    println!("{}", json!({ "error": "invalid subject", "subject": subject }));
                } else {
                    println!("Invalid subject: \"{subject}\"");
                }
                std::process::exit(1);
            }
            Err(e) => return Err(e.into()),
        },
    }

    Ok(())
}

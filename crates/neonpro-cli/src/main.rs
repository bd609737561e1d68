mod config;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use config::NeonproConfig;
use neonpro_audit::{AuditRecorder, ChainVerification, Page};
use neonpro_compliance::{
    AuditContext, ComplianceService, ComplianceSubject, ConsentManager, DataRightsManager,
    JsonReportStore,
};
use neonpro_core::{LegalBasis, SystemClock};
use neonpro_gateway::{AppState, AuthConfig, GatewayServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "neonpro", about = "NeonPro compliance core (ANVISA, LGPD, CFM)")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "neonpro.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Generate an audited compliance report for a subject file
    Report {
        /// JSON file holding a compliance subject
        #[arg(long)]
        subject: PathBuf,
        /// Actor recorded in the audit trail
        #[arg(long)]
        actor: String,
        /// LGPD legal basis of the evaluation
        #[arg(long, default_value = "legal_obligation", value_parser = parse_legal_basis)]
        legal_basis: LegalBasis,
    },
    /// Print the audit trail of a subject
    Audit {
        #[arg(long)]
        subject_id: String,
        /// Inclusive lower bound (RFC 3339)
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Inclusive upper bound (RFC 3339)
        #[arg(long)]
        to: Option<DateTime<Utc>>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Check the hash chain of the audit log
    Verify,
}

fn parse_legal_basis(s: &str) -> Result<LegalBasis, String> {
    serde_json::from_value(serde_json::Value::String(s.to_ascii_lowercase()))
        .map_err(|_| format!("unknown legal basis '{s}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = NeonproConfig::load(&cli.config).await?;

    let store = config.open_audit_store().await?;
    let recorder = Arc::new(AuditRecorder::new(store, Arc::new(SystemClock)));
    let mut service = ComplianceService::new(recorder.clone());
    if config.reports.persist {
        let reports = JsonReportStore::new(config.reports_dir());
        reports.clear_staged().await?;
        service = service.with_report_store(Arc::new(reports));
    }

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            let auth_config = AuthConfig::new(config.security.api_keys.clone());
            if auth_config.is_enabled() {
                info!(keys = auth_config.api_keys.len(), "API key auth enabled");
            } else {
                warn!("API key auth disabled");
            }

            let state = Arc::new(AppState {
                service: Arc::new(service),
                consents: Arc::new(ConsentManager::restore(recorder.clone()).await?),
                rights: Arc::new(DataRightsManager::restore(recorder).await?),
            });
            let app = GatewayServer::build_with_middleware(state, auth_config);

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(
                addr = %addr,
                backend = ?config.audit.backend,
                "NeonPro gateway listening"
            );
            axum::serve(listener, app).await?;
        }
        Commands::Report {
            subject,
            actor,
            legal_basis,
        } => {
            let raw = tokio::fs::read_to_string(&subject).await.map_err(|e| {
                anyhow::anyhow!("Failed to read subject file '{}': {}", subject.display(), e)
            })?;
            let subject: ComplianceSubject = serde_json::from_str(&raw)?;
            let ctx = AuditContext::new(actor, legal_basis);
            let report = service.generate_report(&subject, &ctx).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Audit {
            subject_id,
            from,
            to,
            offset,
            limit,
        } => {
            let page = recorder
                .query_audit_trail(
                    &subject_id,
                    from.unwrap_or(DateTime::<Utc>::MIN_UTC),
                    to.unwrap_or(DateTime::<Utc>::MAX_UTC),
                    Page::new(offset, limit),
                )
                .await?;
            for entry in &page.entries {
                println!("{}", serde_json::to_string(entry)?);
            }
            eprintln!(
                "{} of {} entries{}",
                page.entries.len(),
                page.total,
                page.next_offset
                    .map(|n| format!(", next offset {n}"))
                    .unwrap_or_default()
            );
        }
        Commands::Verify => match recorder.verify().await? {
            ChainVerification::Intact { entries } => {
                println!("audit chain intact ({entries} entries)");
            }
            ChainVerification::Broken {
                index,
                entry_id,
                reason,
            } => {
                anyhow::bail!("audit chain broken at entry {index} ({entry_id}): {reason}");
            }
        },
    }

    Ok(())
}

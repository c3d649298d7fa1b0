//! Mirage control server
//!
//! Serves the encrypted machine and Navi protocol plus the operator console,
//! and provisions organizations, users, pre-auth keys and Navi nodes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use mirage_core::config::{Config, load_config, state_dir};
use mirage_core::db::unix_timestamp;
use mirage_core::tracing_init::init_tracing;
use mirage_crypto::StaticKeyPair;

use mirage_control::console::auth::hash_password;
use mirage_control::console::{ConsoleService, SessionCache};
use mirage_control::ipalloc::IpAllocator;
use mirage_control::protocol::ProtocolHandler;
use mirage_control::server::{AppState, build_router};
use mirage_control::storage::ControlDatabase;

#[derive(Parser, Debug)]
#[command(name = "mirage-control")]
#[command(version, about = "Mirage control server - mesh VPN coordination")]
struct Args {
    /// Config file (JSON). Overrides the global settings file.
    #[arg(long, global = true, env = "MIRAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Path to SQLite database file.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control server.
    Serve {
        /// Address to listen on.
        #[arg(long)]
        addr: Option<String>,

        /// Output logs as JSON.
        #[arg(long)]
        log_json: bool,
    },
    /// Create an organization.
    CreateOrg {
        name: String,
        /// MagicDNS base domain shown in the console.
        #[arg(long, default_value = "")]
        domain: String,
        /// Default key expiry for new machines, in days (0 = never).
        #[arg(long, default_value_t = 180)]
        expiry_days: i64,
    },
    /// Create a console user in an organization.
    CreateUser {
        #[arg(long)]
        org: String,
        name: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long, env = "MIRAGE_USER_PASSWORD")]
        password: String,
    },
    /// Issue a pre-auth key for a user.
    CreateAuthKey {
        #[arg(long)]
        user: String,
        #[arg(long)]
        reusable: bool,
        #[arg(long)]
        ephemeral: bool,
        /// Lifetime in hours (0 = never expires).
        #[arg(long, default_value_t = 24)]
        expiry_hours: i64,
        /// ACL tags applied to machines registered with this key.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Provision a Navi relay node. Omit `--org` for a global node.
    CreateNaviNode {
        id: String,
        #[arg(long)]
        org: Option<String>,
        #[arg(long, default_value = "")]
        hostname: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    if let Some(path) = args.db_path {
        config.server.database_path = Some(path);
    }

    let log_json = matches!(args.command, Command::Serve { log_json: true, .. })
        || config.server.log_json;
    init_tracing(&format!("mirage_control={}", config.server.log_level), log_json)?;

    let db_path = match &config.server.database_path {
        Some(path) => path.clone(),
        None => default_state_path("control.db")?,
    };
    ensure_parent(&db_path)?;
    info!(path = %db_path.display(), "Opening control database");
    let db = ControlDatabase::open(&db_path).await?;

    match args.command {
        Command::Serve { addr, .. } => {
            if let Some(addr) = addr {
                config.server.listen_addr = addr;
            }
            serve(config, db).await
        }
        Command::CreateOrg {
            name,
            domain,
            expiry_days,
        } => {
            let org = db.create_organization(&name, &domain, expiry_days).await?;
            report(&format!("organization {} created (id {})", org.name, org.id));
            Ok(())
        }
        Command::CreateUser {
            org,
            name,
            display_name,
            password,
        } => {
            let org = db
                .get_organization_by_name(&org)
                .await
                .with_context(|| format!("organization {org}"))?;
            let hash = hash_password(&password)?;
            let display = display_name.unwrap_or_else(|| name.clone());
            let user = db.create_user(org.id, &name, &display, &hash).await?;
            report(&format!("user {} created (id {})", user.name, user.id));
            Ok(())
        }
        Command::CreateAuthKey {
            user,
            reusable,
            ephemeral,
            expiry_hours,
            tags,
        } => {
            let user = db
                .get_user_by_name(&user)
                .await
                .with_context(|| format!("user {user}"))?;
            let expiration = if expiry_hours > 0 {
                unix_timestamp().saturating_add(expiry_hours.saturating_mul(3600))
            } else {
                0
            };
            let key = format!(
                "{}{}",
                uuid::Uuid::new_v4().simple(),
                uuid::Uuid::new_v4().simple()
            );
            db.create_preauth_key(&key, user.id, reusable, ephemeral, expiration, &tags)
                .await?;
            report(&key);
            Ok(())
        }
        Command::CreateNaviNode { id, org, hostname } => {
            let org_id = match org {
                Some(name) => {
                    db.get_organization_by_name(&name)
                        .await
                        .with_context(|| format!("organization {name}"))?
                        .id
                }
                None => 0,
            };
            let node = db.create_navi_node(&id, org_id, &hostname).await?;
            report(&format!("navi node {} created (org {})", node.id, node.org_id));
            Ok(())
        }
    }
}

async fn serve(config: Config, db: ControlDatabase) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.listen_addr,
        "Starting mirage-control"
    );

    let key_path = match &config.server.private_key_path {
        Some(path) => path.clone(),
        None => default_state_path("control.key")?,
    };
    ensure_parent(&key_path)?;
    let server_key = StaticKeyPair::load_or_generate(&key_path)?;
    info!(public_key = %server_key.public_key(), "Server key loaded");

    let allocator = IpAllocator::new(&config.network.ipv4_prefix, &config.network.ipv6_prefix)?;
    let protocol = Arc::new(ProtocolHandler::new(
        db.clone(),
        allocator,
        config.network.online_window_secs,
    ));
    let sessions = Arc::new(SessionCache::new());
    let console = Arc::new(ConsoleService::new(
        db.clone(),
        Arc::clone(&sessions),
        Duration::from_secs(config.console.session_ttl_secs),
        config.network.online_window_secs,
    ));

    // Expired console sessions are dropped in the background.
    let purge_every = Duration::from_secs(config.console.session_purge_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = sessions.purge_expired().await;
            if removed > 0 {
                info!(removed, "Purged expired console sessions");
            }
        }
    });

    let state = AppState {
        db,
        protocol,
        console,
        server_key: Arc::new(server_key),
    };
    let app = build_router(state, config.server.max_payload_bytes);

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("bind {}", config.server.listen_addr))?;
    info!(addr = %config.server.listen_addr, "Control server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await?;

    info!("Control server stopped");
    Ok(())
}

fn default_state_path(file: &str) -> anyhow::Result<PathBuf> {
    let dir = state_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine state directory"))?;
    Ok(dir.join(file))
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
fn report(line: &str) {
    println!("{line}");
}

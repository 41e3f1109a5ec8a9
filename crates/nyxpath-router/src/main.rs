// ============================================
// File: crates/nyxpath-router/src/main.rs
// ============================================
//! # nyxpath Router Entry Point
//!
//! ## Creation Reason
//! Binary for running a path router: CLI parsing, logging setup, identity
//! key handling and router startup.
//!
//! ## Usage
//! ```bash
//! # Create an identity
//! nyxpath-router keygen --out /etc/nyxpath/identity.json
//!
//! # Start
//! nyxpath-router start --config /etc/nyxpath/router.toml
//!
//! # Other commands
//! nyxpath-router validate            # Validate config file
//! nyxpath-router pubkey              # Show this router's id
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The key file holds the raw ed25519 secret; it is written 0600
//! - `RUST_LOG` overrides `[logging].level`
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nyxpath_core::crypto::IdentityKeyPair;
use nyxpath_router::{Router, RouterConfig};

const DEFAULT_CONFIG: &str = "/etc/nyxpath/router.toml";

// ============================================
// CLI Definition
// ============================================

/// nyxpath onion path router
#[derive(Parser, Debug)]
#[command(name = "nyxpath-router")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the router
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Generate a new identity key file
    Keygen {
        /// Where to write the key file
        #[arg(short, long)]
        out: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show this router's id
    Pubkey {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start { config } => cmd_start(config).await,
        Commands::Validate { config } => {
            init_logging("info");
            cmd_validate(config).await
        }
        Commands::Keygen { out, force } => {
            init_logging("info");
            cmd_keygen(out, force).await
        }
        Commands::Pubkey { config } => {
            init_logging("warn");
            cmd_pubkey(config).await
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

async fn cmd_start(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_or_default_config(&config_path).await?;
    init_logging(&config.logging.level);

    let key_path = PathBuf::from(&config.router.key_file);
    let identity = load_key(&key_path)
        .await
        .with_context(|| format!("loading identity from {}", key_path.display()))?;

    info!("════════════════════════════════════════");
    info!("Router ID:  {}", identity.router_id());
    info!("Listen:     {}", config.router.listen_addr);
    info!("Peers:      {}", config.peers.len());
    info!("════════════════════════════════════════");

    let router = Router::new(config, identity);
    router.run().await?;
    Ok(())
}

async fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        println!("   Router will use default values.");
        return Ok(());
    }

    let config = RouterConfig::load(&config_path).await?;

    println!("✅ Configuration is valid");
    println!();
    println!("Router:");
    println!("   Listen:       {}", config.router.listen_addr);
    println!("   Key file:     {}", config.router.key_file);
    println!();
    println!("Paths:");
    println!("   Hops:         {}", config.paths.hops);
    println!("   Keep alive:   {}", config.paths.paths);
    println!("   Lifetime:     {}s", config.paths.lifetime_secs);
    println!();
    println!("Transit:");
    println!("   Max hops:     {}", config.transit.max_transit_hops);
    println!();
    println!("Exit:");
    println!("   Allowed:      {}", config.exit.allow_exit);
    println!("   Internet:     {}", config.exit.permit_internet);
    println!();
    println!("Peers:          {}", config.peers.len());
    Ok(())
}

async fn cmd_keygen(out: PathBuf, force: bool) -> anyhow::Result<()> {
    if out.exists() && !force {
        anyhow::bail!("{} exists; pass --force to overwrite", out.display());
    }
    let identity = IdentityKeyPair::generate();
    save_key(&identity, &out).await?;
    println!("{}", identity.router_id());
    info!(path = %out.display(), "Identity written");
    Ok(())
}

async fn cmd_pubkey(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_or_default_config(&config_path).await?;
    let identity = load_key(Path::new(&config.router.key_file)).await?;
    println!("{}", identity.router_id());
    Ok(())
}

// ============================================
// Helper Functions
// ============================================

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}

async fn load_or_default_config(path: &Path) -> anyhow::Result<RouterConfig> {
    if path.exists() {
        Ok(RouterConfig::load(path).await?)
    } else {
        Ok(RouterConfig::default())
    }
}

/// Identity key file format.
#[derive(serde::Serialize, serde::Deserialize)]
struct KeyFile {
    version: String,
    key_type: String,
    router_id: String,
    private_key: String,
    created_at: u64,
}

async fn load_key(path: &Path) -> anyhow::Result<IdentityKeyPair> {
    use base64::Engine;

    let content = tokio::fs::read_to_string(path).await?;
    let key_data: KeyFile = serde_json::from_str(&content)?;
    let private_bytes = base64::engine::general_purpose::STANDARD.decode(&key_data.private_key)?;
    let identity = IdentityKeyPair::from_bytes(&private_bytes)?;

    if identity.router_id().to_string() != key_data.router_id {
        anyhow::bail!("router id in {} does not match its private key", path.display());
    }
    Ok(identity)
}

async fn save_key(identity: &IdentityKeyPair, path: &Path) -> anyhow::Result<()> {
    use base64::Engine;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let key_data = KeyFile {
        version: "1.0".to_string(),
        key_type: "ed25519".to_string(),
        router_id: identity.router_id().to_string(),
        private_key: base64::engine::general_purpose::STANDARD.encode(identity.to_bytes()),
        created_at: nyxpath_common::time::unix_timestamp_millis() / 1000,
    };

    let content = serde_json::to_string_pretty(&key_data)?;
    tokio::fs::write(path, content).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(path).await?.permissions();
        perms.set_mode(0o600);
        tokio::fs::set_permissions(path, perms).await?;
    }

    Ok(())
}

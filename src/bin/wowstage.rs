//! wowstage: operator CLI for the staging cache
//!
//! Reads, seeds and maintains the cache tiers configured in
//! `~/.wowstage/config.toml`. Output is JSON on stdout.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use wowstage::config::{Config, Secrets};
use wowstage::{
    DataRequest, DataType, GameVersion, Region, SeedTarget, StagingService, Target,
};

/// Multi-tier staging cache for WoW game data
#[derive(Parser)]
#[command(name = "wowstage")]
#[command(version)]
#[command(about = "Multi-tier staging cache for WoW game data")]
struct Args {
    /// Config file (default: ~/.wowstage/config.toml, then /etc/wowstage/config.toml)
    #[arg(short, long, env = "WOWSTAGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read one item through the tier chain
    Get {
        /// Data type: auction, guild, realm, character or token
        data_type: DataType,
        /// Guild or character name, or realm slug for realm/auction
        name: Option<String>,
        /// Realm slug for guild and character lookups
        #[arg(long)]
        realm: Option<String>,
        /// Region (default from config)
        #[arg(long)]
        region: Option<Region>,
        /// Game version (default from config)
        #[arg(long)]
        game_version: Option<GameVersion>,
        /// Skip the cache tiers
        #[arg(long)]
        force: bool,
    },

    /// Force-refresh data for every type × target pair
    Seed {
        /// Comma-separated data types
        #[arg(long, value_delimiter = ',', required = true)]
        types: Vec<DataType>,
        /// Realm slugs, or guild/character names
        #[arg(required = true)]
        targets: Vec<String>,
        /// Realm for guild and character targets (default from config)
        #[arg(long)]
        realm: Option<String>,
        /// Region (default from config)
        #[arg(long)]
        region: Option<Region>,
    },

    /// Show persistent cache statistics
    Stats,

    /// Invalidate expired persistent cache entries
    Cleanup,

    /// Import JSON data from a file as manually supplied cache data
    Import {
        data_type: DataType,
        name: Option<String>,
        #[arg(long)]
        realm: Option<String>,
        #[arg(long)]
        region: Option<Region>,
        #[arg(long)]
        game_version: Option<GameVersion>,
        /// JSON file with the payload
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    let secrets = Secrets::load()?;
    let default_region = config.staging.default_region;
    let service = config.service_builder(&secrets)?.build();

    run(&service, args.command, default_region).await
}

async fn run(
    service: &StagingService,
    command: Command,
    default_region: Region,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Get {
            data_type,
            name,
            realm,
            region,
            game_version,
            force,
        } => {
            let target = Target::from_parts(data_type, name.as_deref(), realm.as_deref())?;
            let mut request = DataRequest::new(target)
                .region(region.unwrap_or(default_region))
                .force_refresh(force);
            if let Some(version) = game_version {
                request = request.game_version(version);
            }
            print_json(&service.get_data(&request).await)
        }

        Command::Seed {
            types,
            targets,
            realm,
            region,
        } => {
            let targets: Vec<SeedTarget> = targets
                .into_iter()
                .map(|name| match &realm {
                    Some(realm) => SeedTarget::new(name).on_realm(realm.clone()),
                    None => SeedTarget::new(name),
                })
                .collect();
            let report = service
                .seed_data(&types, &targets, region.unwrap_or(default_region))
                .await;
            print_json(&report)
        }

        Command::Stats => print_json(&service.get_cache_stats().await?),

        Command::Cleanup => {
            let invalidated = service.cleanup_expired_cache().await?;
            print_json(&serde_json::json!({ "invalidated": invalidated }))
        }

        Command::Import {
            data_type,
            name,
            realm,
            region,
            game_version,
            file,
        } => {
            let target = Target::from_parts(data_type, name.as_deref(), realm.as_deref())?;
            let data: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            let record = service
                .import_manual(&target, region.unwrap_or(default_region), game_version, data)
                .await?;
            print_json(&serde_json::json!({
                "id": record.id,
                "key": record.key,
                "expires_at": record.expires_at,
            }))
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

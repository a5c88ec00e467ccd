//! api-cache - inspect and purge an API response cache
//!
//! Operates on the same storage root the console's REST client uses.

use anyhow::{anyhow, Context, Result};
use std::env;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use api_cache::{CacheConfig, CacheManager, Params, ReadOptions};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Print entry count, size, and backend (default)
    Stats,
    /// Print a cached response
    Get { endpoint: String, params: Params },
    /// Drop one cached response
    Invalidate { endpoint: String, params: Params },
    /// Drop every response tagged with a user id
    PurgeUser { user_id: String },
    /// Drop entries past their TTL
    Prune,
    /// Drop every cached response
    Clear,
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"api-cache - Inspect and purge the API response cache

USAGE:
    api-cache                                   # Same as `stats`
    api-cache stats
    api-cache get <endpoint> [params-json]
    api-cache invalidate <endpoint> [params-json]
    api-cache purge-user <user-id>
    api-cache prune
    api-cache clear
    api-cache help

EXAMPLES:
    api-cache get /institute-classes '{{"page":1,"limit":50}}'
    api-cache purge-user 42

ENVIRONMENT:
    API_CACHE_DIR             Storage root (default: <user cache dir>/api-cache)
    API_CACHE_PREFIX          Key prefix (default: api_cache_)
    API_CACHE_TTL_MINUTES     Default TTL in minutes (default: 30)
    API_CACHE_TIERS           Tier order, e.g. structured,key-value,volatile
    API_CACHE_QUOTA_BYTES     Key-value namespace quota
    API_CACHE_SCHEMA_VERSION  Structured store schema version
    RUST_LOG                  Log filter (trace, debug, info, warn, error)
"#
    );
}

fn parse_params(raw: Option<&String>) -> Result<Params> {
    match raw {
        None => Ok(Params::new()),
        Some(text) => {
            let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)
                .with_context(|| format!("Params must be a JSON object, got: {}", text))?;
            Ok(Params::from(map))
        }
    }
}

fn parse_args(args: &[String]) -> Result<Command> {
    if args.len() < 2 {
        return Ok(Command::Stats);
    }

    match args[1].as_str() {
        "stats" => Ok(Command::Stats),
        "get" | "invalidate" => {
            let endpoint = args
                .get(2)
                .cloned()
                .ok_or_else(|| anyhow!("Usage: api-cache {} <endpoint> [params-json]", args[1]))?;
            let params = parse_params(args.get(3))?;
            if args[1] == "get" {
                Ok(Command::Get { endpoint, params })
            } else {
                Ok(Command::Invalidate { endpoint, params })
            }
        }
        "purge-user" => {
            let user_id = args
                .get(2)
                .cloned()
                .ok_or_else(|| anyhow!("Usage: api-cache purge-user <user-id>"))?;
            Ok(Command::PurgeUser { user_id })
        }
        "prune" => Ok(Command::Prune),
        "clear" => Ok(Command::Clear),
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command
    let args: Vec<String> = env::args().collect();
    let command = match parse_args(&args) {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if let Command::Help = command {
        print_help();
        return Ok(());
    }

    let config = CacheConfig::from_env();
    info!(root = %config.storage_root.display(), "Opening cache");
    let cache = CacheManager::new(config);
    cache.initialize().await;

    match command {
        Command::Stats => {
            let stats = cache.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Get { endpoint, params } => {
            let payload: Option<serde_json::Value> =
                cache.read(&endpoint, &params, ReadOptions::new()).await;
            match payload {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => {
                    error!(endpoint = %endpoint, "No fresh cache entry");
                    std::process::exit(2);
                }
            }
        }
        Command::Invalidate { endpoint, params } => {
            cache.invalidate(&endpoint, &params).await;
            info!(key = %cache.key_for(&endpoint, &params), "Invalidated");
        }
        Command::PurgeUser { user_id } => {
            cache.invalidate_user_scope(&user_id).await;
            info!(user_id = %user_id, "Purged user scope");
        }
        Command::Prune => {
            let removed = cache.purge_expired().await;
            println!("{}", serde_json::json!({ "removed": removed }));
        }
        Command::Clear => {
            cache.invalidate_all().await;
            info!("Cache cleared");
        }
        Command::Help => unreachable!("handled before opening the cache"),
    }

    cache.dispose().await;
    Ok(())
}

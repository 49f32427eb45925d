//! llm-exec-cache: inspect and clear a local response cache directory.
//!
//! Usage:
//!   llm-exec-cache stats              Entry count and directory
//!   llm-exec-cache get <fingerprint>  Print one entry as JSON
//!   llm-exec-cache clear [fingerprint]  Remove one entry, or all of them
//!
//! The directory comes from `LLM_EXEC_CACHE_DIR`, or a config file given with
//! `LLM_EXEC_CONFIG`, else `.llm_cache`. Set `RUST_LOG` for diagnostics.

use anyhow::{bail, Context};
use llm_exec::cache::{CacheBackend, CacheKey, FileStore};
use llm_exec::EngineConfig;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    println!(
        r#"llm-exec-cache: local response cache tool

USAGE:
    llm-exec-cache <COMMAND>

COMMANDS:
    stats                 Show entry count and cache directory
    get <fingerprint>     Print a cached entry
    clear [fingerprint]   Remove one entry, or every entry when omitted
    help                  Show this help message

ENVIRONMENT:
    LLM_EXEC_CONFIG       YAML config file
    LLM_EXEC_CACHE_DIR    Cache directory (overrides the config file)
    RUST_LOG              Log filter, e.g. llm_exec=debug"#
    );
}

fn load_config() -> anyhow::Result<EngineConfig> {
    let mut config = match std::env::var("LLM_EXEC_CONFIG") {
        Ok(path) => EngineConfig::from_yaml_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        Err(_) => EngineConfig::default(),
    };
    config.apply_env().context("reading LLM_EXEC_* environment")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        print_usage();
        std::process::exit(1);
    };

    let config = load_config()?;
    let store = FileStore::new(config.cache_dir.clone());

    match command.as_str() {
        "stats" => {
            let count = store.len().await?;
            println!("directory: {}", store.dir().display());
            println!("entries:   {}", count);
            println!("remote ttl: {} days", config.cache_ttl_days);
        }
        "get" => {
            let Some(fingerprint) = args.get(1) else {
                bail!("get needs a fingerprint");
            };
            match store.get(&CacheKey::new(fingerprint.as_str())).await? {
                Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
                None => bail!("no entry for {}", fingerprint),
            }
        }
        "clear" => match args.get(1) {
            Some(fingerprint) => {
                let removed = store.delete(&CacheKey::new(fingerprint.as_str())).await?;
                println!("{}", if removed { "removed" } else { "not found" });
            }
            None => {
                let count = store.len().await?;
                store.clear().await?;
                println!("removed {} entries", count);
            }
        },
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
    Ok(())
}

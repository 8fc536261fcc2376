mod cli;
mod output;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use serde_json::Value;
use tiercache::{CacheConfig, TieredCache, loader};

use cli::{Cli, Commands};
use output::{print_error, print_success, print_warning};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    tiercache::init_tracing_with_level(&cli.log_level);
    let format = cli.format.unwrap_or_default();
    let config = resolve_config(&cli)?;

    if let Commands::Config = &cli.command {
        println!("{}: {}", "Endpoint".cyan(), config.remote_endpoint);
        println!("{}", toml::to_string_pretty(&config).context("render config")?);
        return Ok(());
    }

    let cache = TieredCache::connect(&config).await?;

    match &cli.command {
        Commands::Get(args) => match cache.get(&args.key).await {
            Some(value) => output::print_value(&value, format),
            None => print_warning(&format!("{} not found", args.key)),
        },
        Commands::Set(args) => {
            let value = parse_value(&args.value)?;
            cache
                .set(&args.key, value, Duration::from_secs(args.ttl), &args.tags)
                .await;
            report_write(&cache, &format!("Set {}", args.key));
        }
        Commands::Delete(args) => {
            cache.delete(&args.key).await;
            report_write(&cache, &format!("Deleted {}", args.key));
        }
        Commands::InvalidateTags(args) => {
            let deleted = cache.invalidate_by_tags(&args.tags).await;
            report_write(
                &cache,
                &format!("Invalidated {deleted} key(s) tagged {}", args.tags.join(", ")),
            );
        }
        Commands::InvalidatePattern(args) => {
            let deleted = cache.invalidate_by_pattern(&args.pattern).await;
            report_write(
                &cache,
                &format!("Invalidated {deleted} key(s) matching {}", args.pattern),
            );
        }
        Commands::Health => {
            let health = cache.health();
            output::print_health(&health, format);
            if health.is_degraded() || !health.remote_connected {
                cache.close().await;
                anyhow::bail!("backing store unavailable");
            }
        }
        Commands::Config => {}
    }

    cache.close().await;
    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<CacheConfig> {
    let mut config = loader::load_config_from_path(cli.config.as_ref())?;
    if let Some(endpoint) = &cli.endpoint {
        config.remote_endpoint = endpoint.clone();
        config.validate()?;
    }
    Ok(config)
}

fn parse_value(raw: &str) -> Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?
        }
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("Value is not valid JSON")
}

/// Writes never fail; a degraded cache only means they stayed local.
fn report_write(cache: &TieredCache, msg: &str) {
    let health = cache.health();
    if health.is_degraded() || !health.remote_connected {
        print_warning(&format!("{msg} (local only, backing store unavailable)"));
    } else {
        print_success(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_config_reads_config_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.toml");
        std::fs::write(&path, "local_default_ttl_seconds = 42\n").unwrap();

        let cli = Cli::try_parse_from([
            "tiercache",
            "--config",
            path.to_str().unwrap(),
            "health",
        ])
        .unwrap();
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.local_default_ttl(), Duration::from_secs(42));
    }

    #[test]
    fn test_endpoint_flag_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.toml");
        std::fs::write(&path, "remote_endpoint = \"redis://primary:6379\"\n").unwrap();

        let cli = Cli::try_parse_from([
            "tiercache",
            "--config",
            path.to_str().unwrap(),
            "--endpoint",
            "redis://replica:6379",
            "config",
        ])
        .unwrap();
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.remote_endpoint, "redis://replica:6379");
    }
}

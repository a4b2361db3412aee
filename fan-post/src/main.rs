//! fan-post - Publish one post to many linked accounts

use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use libfanpost::config::Config;
use libfanpost::logging::{LogFormat, LoggingConfig};
use libfanpost::{
    AggregateResult, Database, Dispatcher, FanpostError, MediaLimits, MediaNormalizer,
    PlatformRegistry, PublishRequest, RawMedia, ValidationError,
};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "fan-post")]
#[command(version)]
#[command(about = "Publish one post to many linked accounts", long_about = "\
fan-post - Publish one post to many linked accounts

DESCRIPTION:
    fan-post sends the same text and media to every selected account at
    once. Each account succeeds or fails on its own; expired tokens are
    refreshed once and the post is retried.

USAGE:
    fan-post \"Hello everyone\" --user me --account acc-1 --account acc-2
    echo \"Hello\" | fan-post --user me --account acc-1
    fan-post \"New clip\" --user me --account acc-1 --media clip.mp4
    fan-post \"Hi\" --user me --account acc-1 --setting acc-1:subreddit=rust

EXIT CODES:
    0 - Published to at least one account
    1 - Every account failed
    2 - Every account failed and needs to be reconnected
    3 - Invalid request (nothing to post, no valid accounts, bad media)
")]
struct Cli {
    /// Content to post (reads from stdin if not provided)
    content: Option<String>,

    /// User whose linked accounts are used
    #[arg(short, long, env = "FANPOST_USER")]
    user: String,

    /// Target account id (repeatable)
    #[arg(short, long = "account", value_name = "ID")]
    accounts: Vec<String>,

    /// Media file to attach (repeatable)
    #[arg(short, long = "media", value_name = "PATH")]
    media: Vec<PathBuf>,

    /// Per-account setting, e.g. acc-1:subreddit=rust (repeatable)
    #[arg(short, long = "setting", value_name = "ACCOUNT:KEY=VALUE", value_parser = parse_setting)]
    settings: Vec<(String, String, String)>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_setting(raw: &str) -> Result<(String, String, String), String> {
    let (account, pair) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected ACCOUNT:KEY=VALUE, got '{}'", raw))?;
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| format!("expected ACCOUNT:KEY=VALUE, got '{}'", raw))?;
    if account.is_empty() || key.is_empty() {
        return Err(format!("account and key must not be empty in '{}'", raw));
    }
    Ok((account.to_string(), key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_format = std::env::var("FANPOST_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LogFormat::Text);
    let level = if cli.verbose { "debug" } else { "error" };
    LoggingConfig::new(log_format, level.to_string(), cli.verbose).init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<FanpostError>()
                .map(FanpostError::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    if cli.format != "text" && cli.format != "json" {
        anyhow::bail!("Invalid format '{}'. Valid formats: text, json", cli.format);
    }

    let content = read_content(cli.content)?;
    let media = cli
        .media
        .iter()
        .map(|path| read_media(path))
        .collect::<Result<Vec<_>, _>>()?;

    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let registry = PlatformRegistry::from_config(&config)?;
    debug!("Adapters available: {:?}", registry.providers());

    let store = Arc::new(db);
    let dispatcher = Dispatcher::new(store.clone(), store, registry)
        .with_normalizer(MediaNormalizer::new(MediaLimits::from(&config.media)))
        .with_tracker_timeout(config.dispatch.tracker_timeout());

    let mut request = PublishRequest::new(content).to_accounts(cli.accounts);
    request.media = media;
    for (account, key, value) in cli.settings {
        request = request.with_setting(account, key, value);
    }

    let result = dispatcher.dispatch(&cli.user, request).await?;

    if cli.format == "json" {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_text(&result);
    }

    Ok(exit_code(&result))
}

fn read_content(content: Option<String>) -> anyhow::Result<String> {
    if let Some(content) = content {
        return Ok(content);
    }
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(String::new());
    }
    let mut buffer = String::new();
    stdin
        .read_to_string(&mut buffer)
        .context("Failed to read content from stdin")?;
    Ok(buffer.trim_end().to_string())
}

fn read_media(path: &Path) -> Result<RawMedia, FanpostError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let data = std::fs::read(path).map_err(|e| ValidationError::MediaDecode {
        name: name.clone(),
        reason: e.to_string(),
    })?;
    Ok(RawMedia::from_bytes(name, None, data))
}

fn print_text(result: &AggregateResult) {
    for outcome in result.outcomes.values() {
        let label = format!(
            "{}:{} ({})",
            outcome.provider, outcome.account_id, outcome.account_name
        );
        if outcome.success {
            let location = outcome
                .url
                .as_deref()
                .or(outcome.post_id.as_deref())
                .unwrap_or("-");
            println!("ok     {} {}", label, location);
            if let Some(message) = &outcome.message {
                println!("       {}", message);
            }
        } else {
            let kind = outcome.error_kind.map(|k| k.to_string()).unwrap_or_default();
            println!(
                "failed {} [{}] {}",
                label,
                kind,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    println!("{}", result.message);
}

fn exit_code(result: &AggregateResult) -> i32 {
    if result.success {
        0
    } else if result.all_require_reconnect() {
        2
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_setting() {
        assert_eq!(
            parse_setting("acc-1:subreddit=rust").unwrap(),
            (
                "acc-1".to_string(),
                "subreddit".to_string(),
                "rust".to_string()
            )
        );
        assert_eq!(parse_setting("acc-1:title=a=b").unwrap().2, "a=b");
        assert!(parse_setting("acc-1").is_err());
        assert!(parse_setting("acc-1:novalue").is_err());
        assert!(parse_setting(":k=v").is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

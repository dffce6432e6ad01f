use anyhow::{bail, Context, Result};
use colored::Colorize;
use log_sage::{config, AnalysisService, Level, SourceLocation};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::info;

use crate::cli::AnalyzeArgs;

/// Execute the analyze command
///
/// Replays the log file into a fresh session and waits for the analysis.
/// The session handle is dropped after replay, so a failed analysis closes
/// the channel instead of leaving us waiting for the deadline.
pub async fn execute(config_path: Option<&Path>, args: AnalyzeArgs) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    if !cfg.provider.has_credential() {
        bail!("provider.api_key is not configured (set LOG_SAGE__PROVIDER__API_KEY)");
    }
    let wait = cfg.provider.timeout() + Duration::from_secs(5);

    let contents = read_input(&args.input)?;

    let file = args
        .source_file
        .clone()
        .unwrap_or_else(|| args.input.display().to_string());
    let source = SourceLocation::new(file, args.function.clone());

    let service = AnalysisService::new(cfg)?;
    let (tx, rx) = oneshot::channel::<String>();
    let tx = Arc::new(Mutex::new(Some(tx)));

    let mut builder = service.session_builder(source).tags(args.tags.clone());
    if args.source_file.is_none() {
        builder = builder.without_source_excerpt();
    }
    let session = builder
        .on_analysis(move |analysis| {
            if let Some(tx) = tx.lock().map_err(|e| e.to_string())?.take() {
                let _ = tx.send(analysis.to_string());
            }
            Ok(())
        })
        .build();

    for line in contents.lines() {
        let (level, message) = parse_line(line);
        session.append(level, message);
    }

    info!(
        session_id = %session.id(),
        entries = session.entries().len(),
        "Log replayed into session"
    );

    if !session.has_errors() {
        println!("{}", "No ERROR entries found, nothing to analyse.".yellow());
        session.print();
        return Ok(());
    }

    println!(
        "{} {}",
        "Waiting for analysis of session".cyan(),
        session.id().to_string().bold()
    );
    drop(session);

    match tokio::time::timeout(wait, rx).await {
        Ok(Ok(analysis)) => {
            println!();
            println!("{}", "Analysis:".green().bold());
            println!("{}", analysis);
            Ok(())
        }
        Ok(Err(_)) => bail!("analysis failed, see the log output above"),
        Err(_) => bail!("no analysis received within {:?}", wait),
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read log from stdin")?;
        return Ok(buf);
    }

    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Split an optional level prefix off a log line.
///
/// Accepts `ERROR msg`, `[ERROR] msg` and `ERROR: msg`; lines without a
/// recognised prefix are treated as INFO.
pub fn parse_line(line: &str) -> (Level, &str) {
    let trimmed = line.trim_start();
    let (token, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest),
        None => (trimmed, ""),
    };

    let candidate = token
        .trim_start_matches('[')
        .trim_end_matches(':')
        .trim_end_matches(']');

    match candidate.parse::<Level>() {
        Ok(Level::Analysis) | Err(_) => (Level::Info, line),
        Ok(level) => (level, rest.trim_start()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_prefixes() {
        assert_eq!(parse_line("ERROR db timeout"), (Level::Error, "db timeout"));
        assert_eq!(parse_line("[WARN] slow query"), (Level::Warn, "slow query"));
        assert_eq!(parse_line("debug: cache miss"), (Level::Debug, "cache miss"));
        assert_eq!(parse_line("  INFO   started"), (Level::Info, "started"));
    }

    #[test]
    fn test_parse_line_without_prefix_is_info() {
        assert_eq!(parse_line("just a line"), (Level::Info, "just a line"));
        assert_eq!(parse_line(""), (Level::Info, ""));
    }

    #[test]
    fn test_parse_line_cannot_forge_analysis() {
        assert_eq!(
            parse_line("ANALYSIS fake result"),
            (Level::Info, "ANALYSIS fake result")
        );
    }
}

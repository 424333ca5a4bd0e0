#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod cli;
mod error_fmt;
mod run;
mod sink;

use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use eyre::Result;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", error_fmt::format_error_json(&e));
        } else {
            eprintln!("{}", error_fmt::humanize(&e));
        }
        std::process::exit(error_fmt::exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> Result<()> {
    let cfg = run::load_config(&cli.config, cli.calibration.as_deref())?;
    init_tracing(&cli, &cfg.logging)?;
    if !cli.json {
        // ignore: a hook may already be installed in tests
        let _ = color_eyre::install();
    }

    match cli.cmd {
        Commands::Run {
            ticks,
            renew,
            lockout,
        } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            {
                let flag = shutdown.clone();
                if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
                    tracing::warn!(error = %e, "failed to install Ctrl-C handler");
                }
            }
            let summary = run::run(&cfg, cli.json, ticks, renew, lockout, shutdown)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "result": "run",
                        "ticks": summary.ticks,
                        "engaged_ticks": summary.ticks_engaged,
                        "transitions": summary.transitions,
                        "peak_faults": summary.peak_faults,
                    })
                );
            } else {
                println!(
                    "run complete: ticks={} engaged_ticks={} transitions={} peak_faults={}",
                    summary.ticks, summary.ticks_engaged, summary.transitions, summary.peak_faults
                );
            }
        }
        Commands::SelfCheck => {
            let outcome = run::self_check(&cfg)?;
            let faults: Vec<String> = outcome
                .faults
                .iter()
                .map(|f| format!("{}:{}", f.entity, f.kind))
                .collect();
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "result": "self-check",
                        "faults": faults,
                        "current_limit": outcome.current_limit,
                        "keepalive_expired": outcome.keepalive_expired,
                    })
                );
            } else {
                println!(
                    "self-check ok: faults=[{}] current_limit={:.1} keepalive_expired={}",
                    faults.join(","),
                    outcome.current_limit,
                    outcome.keepalive_expired
                );
            }
        }
        Commands::Renew { ms } => {
            let deadline = run::renew(&cfg, ms)?;
            if cli.json {
                println!("{}", serde_json::json!({ "deadline_ms": deadline }));
            } else {
                println!("keep-alive renewed: deadline_ms={deadline}");
            }
        }
        Commands::Status => {
            let st = run::status(&cfg)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "k_ms": st.k_ms,
                        "deadline_ms": st.deadline_ms,
                        "remaining_ms": st.remaining_ms,
                        "expired": st.expired,
                    })
                );
            } else {
                let deadline = st
                    .deadline_ms
                    .map_or_else(|| "none".to_string(), |d| d.to_string());
                println!(
                    "keep-alive: k_ms={} deadline_ms={deadline} remaining_ms={} expired={}",
                    st.k_ms, st.remaining_ms, st.expired
                );
            }
        }
    }
    Ok(())
}

/// Console layer on stderr (JSON with `--json`), optional JSON file layer.
/// `RUST_LOG` wins over `--log-level`, which wins over `[logging] level`.
fn init_tracing(cli: &Cli, logging: &bms_config::Logging) -> Result<()> {
    let level = if cli.log_level != "info" {
        cli.log_level.as_str()
    } else {
        logging.level.as_deref().unwrap_or("info")
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let (console_json, console_text) = if cli.json {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
            None,
        )
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            ),
        )
    };

    let file_layer = match logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_json)
        .with(console_text)
        .with(file_layer)
        .try_init()?;
    Ok(())
}

use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use dnsfail::prelude::*;
use dnsfail::{logging, APP_NAME, VERSION as LIB_VERSION};
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Colors the command word and its arguments as they are typed.
#[derive(Completer, Helper, Hinter, Validator)]
struct CommandHighlighter;

impl Highlighter for CommandHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            Cow::Owned(format!("{} {}", command.yellow().bold(), rest.yellow()))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    const LOGO_TEXT: &str = include_str!("../logo.log");
    println!("{}", LOGO_TEXT.red());
    println!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!("{}", "-".repeat(60).dimmed());
}

fn print_help() {
    println!("Available commands:");
    println!("  status           - Shows the elapsed time since the last DNS failure.");
    println!("  reset            - Resets the counter, exactly like pressing the button.");
    println!("  health           - Checks that the daemon is answering.");
    println!("  metrics          - Prints the daemon's metrics.");
    println!("  file             - Shows the persisted record without asking the daemon.");
    println!("  watch on|off     - Prints the counter once a second.");
    println!("  exit             - Quits the shell.");
}

async fn print_status(client: &ControlClient) {
    match client.status().await {
        Ok(status) => {
            println!(
                "--> {} {}",
                status.uptime.formatted.line1.red().bold(),
                status.uptime.formatted.line2.red().bold()
            );
            println!("    last reset: {} ({})", status.last_reset, status.last_reset_local);
        }
        Err(e) => println!("{} {:#}", "Error:".red(), e),
    }
}

/// Reads the persistence file directly, for when the daemon is down.
fn print_file(store: &StateStore) {
    println!("--> {}", store.path().display());
    let Some(record) = store.read_record() else {
        println!("    No usable record. The daemon would start counting from now.");
        return;
    };
    println!(
        "    version: {}",
        record.version.map_or("missing".to_string(), |v| v.to_string())
    );
    match store.load() {
        Some(origin) => {
            let (line1, line2) = format_elapsed(chrono::Utc::now(), origin);
            println!(
                "    last_reset: {} (local {})",
                origin,
                origin.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
            );
            println!("    elapsed: {} {}", line1, line2);
        }
        None => println!("    last_reset: unreadable"),
    }
}

/// Prints the counter every second while `enabled` is set.
fn spawn_watcher(client: ControlClient, enabled: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if !enabled.load(Ordering::Relaxed) {
                continue;
            }
            match client.status().await {
                Ok(status) => println!(
                    "<-- [WATCH] {} {}",
                    status.uptime.formatted.line1, status.uptime.formatted.line2
                ),
                Err(e) => println!("<-- [WATCH] {:#}", e),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    let config_path = DnsfailConfig::resolve_path(env::args_os().nth(1).map(PathBuf::from));
    let config = DnsfailConfig::load(&config_path);
    logging::init("warn");

    let client = ControlClient::for_local_daemon(&config.web_host, config.web_port);
    let store = StateStore::new(config.persistence_file.clone());
    debug!("Talking to {} via {}", APP_NAME, client.addr());

    let is_watching = Arc::new(AtomicBool::new(false));
    spawn_watcher(client.clone(), is_watching.clone());

    let mut rl = Editor::new()?;
    rl.set_helper(Some(CommandHighlighter));

    println!(
        "Connected to {} at {}. Type 'help' for commands or 'exit' to quit.",
        APP_NAME.cyan(),
        client.addr()
    );
    if !config.web_enabled {
        println!(
            "{}",
            "Note: the control surface is disabled in the config; only 'file' will work."
                .dimmed()
        );
    }

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        match rl.readline(&prompt) {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let args = line.split_whitespace().collect::<Vec<_>>();

                let Some(command) = args.first() else {
                    continue;
                };
                match *command {
                    "status" => print_status(&client).await,
                    "reset" => match client.reset().await {
                        Ok(reset) => println!("--> {} at {}", reset.message, reset.timestamp),
                        Err(e) => println!("{} {:#}", "Error:".red(), e),
                    },
                    "health" => match client.health().await {
                        Ok(health) => println!("--> {}", health.status.green()),
                        Err(e) => println!("{} {:#}", "Error:".red(), e),
                    },
                    "metrics" => match client.metrics().await {
                        Ok(text) => print!("{}", text),
                        Err(e) => println!("{} {:#}", "Error:".red(), e),
                    },
                    "file" => print_file(&store),
                    "watch" => match args.get(1) {
                        Some(&"on") => {
                            is_watching.store(true, Ordering::Relaxed);
                            println!("--> Watching the counter.");
                        }
                        Some(&"off") => {
                            is_watching.store(false, Ordering::Relaxed);
                            println!("--> Stopped watching.");
                        }
                        _ => println!("Usage: watch on|off"),
                    },
                    "help" => print_help(),
                    "exit" => break,
                    _ => println!("Unknown command: '{}'. Type 'help'.", line.trim()),
                }
            }
            Err(_) => break,
        }
    }

    println!("Exiting dnsfail-shell...");
    Ok(())
}

//! Tracks drops from a live game log and prints a summary every second.
//!
//! Usage:
//!     track /path/to/UE_game.log [--from-start] [--once]
//!
//! The file does not need to exist yet. With `--once`, the whole file is read
//! a single time and the final summary printed. Set `RUST_LOG` to adjust
//! logging (default `droptail=info`).

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use droptail::{consume, ingest_file, ItemTable, Parser, Summary, TailOptions, Tailer, Tracker};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn print_summary(tracker: &Tracker, items: &ItemTable) -> serde_json::Result<()> {
    let summary = Summary::new(&tracker.state(), items, Local::now().naive_local());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("droptail=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: track <log path> [--from-start] [--once]");
        std::process::exit(2);
    };
    let flags: Vec<String> = args.collect();
    let from_start = flags.iter().any(|f| f == "--from-start");
    let once = flags.iter().any(|f| f == "--once");

    let items = ItemTable::load_first(ItemTable::default_locations());
    let parser = Parser::new();
    let tracker = Arc::new(Tracker::new());

    if once {
        let applied = ingest_file(&path, &parser, &tracker).await?;
        info!(applied, "processed {}", path);
        print_summary(&tracker, &items)?;
        return Ok(());
    }

    let (cancel, shutdown) = watch::channel(false);
    let (tx, rx) = mpsc::channel(1024);

    let tailer = Tailer::new(TailOptions::new(&path).from_start(from_start));
    let consumer = {
        let tracker = tracker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consume(rx, &parser, &tracker, shutdown).await })
    };
    let mut tailing = tokio::spawn(async move { tailer.run(shutdown, tx).await });

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => print_summary(&tracker, &items)?,
            _ = tokio::signal::ctrl_c() => {
                info!("stopping");
                let _ = cancel.send(true);
            }
            finished = &mut tailing => {
                match finished? {
                    Ok(exit) => info!(?exit, "tailer finished"),
                    Err(e) => error!("tailer failed: {}", e),
                }
                let _ = cancel.send(true);
                break;
            }
        }
    }

    consumer.await?;
    print_summary(&tracker, &items)?;

    Ok(())
}

//! Live drop tracking for Torchlight Infinite, driven by the game's own log.
//!
//! Three stages, each usable on its own:
//!
//! 1. [`Tailer`] follows `UE_game.log` across creation, truncation and
//!    rotation and sends every complete line, in order, into a bounded
//!    channel.
//! 2. [`Parser`] turns a line into at most one [`Event`] (map start/end,
//!    inventory baseline, inventory change).
//! 3. [`Tracker`] applies events to a per-map tally and hands out
//!    independent [`State`] snapshots.
//!
//! [`consume`] connects the channel to the parser and tracker, and
//! [`Summary`] prices a snapshot with an [`ItemTable`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use droptail::{consume, Parser, TailOptions, Tailer, Tracker};
//! use tokio::sync::{mpsc, watch};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), droptail::Error> {
//!     let tracker = Arc::new(Tracker::new());
//!     let (cancel, shutdown) = watch::channel(false);
//!     let (tx, rx) = mpsc::channel(1024);
//!
//!     let consumer = {
//!         let tracker = tracker.clone();
//!         let shutdown = shutdown.clone();
//!         tokio::spawn(async move { consume(rx, &Parser::new(), &tracker, shutdown).await })
//!     };
//!
//!     let tailer = Tailer::new(TailOptions::new("UE_game.log"));
//!     tokio::spawn(async move {
//!         tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!         let _ = cancel.send(true);
//!     });
//!     tailer.run(shutdown, tx).await?;
//!     let _ = consumer.await;
//!
//!     println!("dropped this session: {}", tracker.state().total_drops);
//!     Ok(())
//! }
//! ```

mod error;
mod event;
mod events;
mod items;
mod parser;
mod pipeline;
mod reader;
mod tracker;

pub use error::Error;
pub use event::{BagPayload, Event, EventKind};
pub use items::{ItemInfo, ItemTable, MapLine, Summary, TallyLine, ITEM_TABLE_FILE};
pub use parser::{Parser, MAPS_PREFIX, SAFE_HUB};
pub use pipeline::{consume, ingest_file, LineStream, ParsedEvents};
pub use reader::{Exit, TailOptions, Tailer};
pub use tracker::{MapSession, SlotKey, State, Tracker, RECENT_EVENTS};

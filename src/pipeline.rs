//! Wiring between the tailer, the parser and the tracker.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::ready;
use futures_util::stream::{Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Split};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::event::Event;
use crate::parser::Parser;
use crate::reader::{cancelled, Exit};
use crate::tracker::Tracker;

type SegmentReader = Split<BufReader<File>>;

/// The receiving half of the line queue as a [`Stream`].
#[derive(Debug)]
pub struct LineStream {
    rx: mpsc::Receiver<String>,
}

impl LineStream {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        LineStream { rx }
    }

    pub fn into_inner(self) -> mpsc::Receiver<String> {
        self.rx
    }
}

impl Stream for LineStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

pin_project! {
/// Parses every line of an inner stream, yielding only recognized events.
///
/// Unrecognized lines are skipped silently; the stream ends when the inner
/// one does.
#[derive(Debug)]
pub struct ParsedEvents<'p, S> {
    #[pin]
    lines: S,
    parser: &'p Parser,
}
}

impl<'p, S> ParsedEvents<'p, S> {
    pub fn new(lines: S, parser: &'p Parser) -> Self {
        ParsedEvents { lines, parser }
    }
}

impl<S> Stream for ParsedEvents<'_, S>
where
    S: Stream,
    S::Item: AsRef<str>,
{
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            match ready!(this.lines.as_mut().poll_next(cx)) {
                Some(line) => {
                    if let Some(event) = this.parser.parse(line.as_ref()) {
                        return Poll::Ready(Some(event));
                    }
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Feeds every event parsed from `lines` to `tracker`, in order, until
/// `shutdown` fires or every line sender is gone.
///
/// This is meant to be the tracker's only writer.
pub async fn consume(
    lines: mpsc::Receiver<String>,
    parser: &Parser,
    tracker: &Tracker,
    mut shutdown: watch::Receiver<bool>,
) -> Exit {
    let mut events = ParsedEvents::new(LineStream::new(lines), parser);

    loop {
        tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => return Exit::Cancelled,
            event = events.next() => match event {
                Some(event) => tracker.on_event(&event),
                None => {
                    debug!("line channel closed");
                    return Exit::Closed;
                }
            },
        }
    }
}

/// Reads a complete file once, applying every recognized line to `tracker`.
///
/// Returns how many events were applied. Invalid UTF-8 is replaced rather
/// than rejected.
pub async fn ingest_file(
    path: impl AsRef<Path>,
    parser: &Parser,
    tracker: &Tracker,
) -> io::Result<usize> {
    let mut segments: SegmentReader = BufReader::new(File::open(path).await?).split(b'\n');
    let mut applied = 0;

    while let Some(segment) = segments.next_segment().await? {
        let line = String::from_utf8_lossy(&segment);
        if let Some(event) = parser.parse(&line) {
            tracker.on_event(&event);
            applied += 1;
        }
    }

    debug!(applied, "ingested file");
    Ok(applied)
}

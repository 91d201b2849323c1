//! Everything related to following a log file and reading complete lines.
//!
//! The follow loop is an explicit state machine: `Phase` records what is
//! known about the file, `Phase::step` decides what to do given a fresh
//! `stat` of the path, and `Follow` carries out that decision.

use std::fs::Metadata;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use memchr::memchr_iter;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, trace, warn};

use crate::events::Wakeups;
use crate::Error;

const DEFAULT_POLL_EVERY: Duration = Duration::from_millis(300);
const DEFAULT_READ_CHUNK: usize = 64 * 1024;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// How a [`Tailer`] follows its file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TailOptions {
    /// The file to follow. It does not need to exist yet.
    pub path: PathBuf,
    /// Start at offset 0 instead of skipping what the file already holds.
    pub from_start: bool,
    pub poll_every: Duration,
    /// Upper bound on bytes read per poll.
    pub read_chunk: usize,
    /// Wait between attempts to open a file that does not exist yet.
    pub retry_backoff: Duration,
}

impl Default for TailOptions {
    fn default() -> Self {
        TailOptions {
            path: PathBuf::new(),
            from_start: false,
            poll_every: DEFAULT_POLL_EVERY,
            read_chunk: DEFAULT_READ_CHUNK,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl TailOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TailOptions {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn from_start(mut self, from_start: bool) -> Self {
        self.from_start = from_start;
        self
    }

    pub fn poll_every(mut self, interval: Duration) -> Self {
        self.poll_every = interval;
        self
    }

    pub fn read_chunk(mut self, bytes: usize) -> Self {
        self.read_chunk = bytes;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Why [`Tailer::run`] or [`consume`](crate::consume) returned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Exit {
    /// The shared shutdown signal fired, or its sender was dropped.
    Cancelled,
    /// [`Tailer::stop`] was called.
    Stopped,
    /// The line channel was closed from the other end.
    Closed,
}

/// Follows one file path across creation, truncation and rotation, sending
/// every complete line exactly once and in order.
///
/// ```no_run
/// use droptail::{TailOptions, Tailer};
/// use tokio::sync::{mpsc, watch};
///
/// # async fn demo() -> Result<(), droptail::Error> {
/// let tailer = Tailer::new(TailOptions::new("UE_game.log"));
/// let (_cancel, shutdown) = watch::channel(false);
/// let (tx, mut rx) = mpsc::channel(1024);
///
/// tokio::spawn(async move {
///     while let Some(line) = rx.recv().await {
///         println!("{line}");
///     }
/// });
/// tailer.run(shutdown, tx).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Tailer {
    options: TailOptions,
    stop: watch::Sender<bool>,
}

impl Tailer {
    /// Zero durations and chunk sizes fall back to the defaults.
    pub fn new(mut options: TailOptions) -> Self {
        if options.poll_every.is_zero() {
            options.poll_every = DEFAULT_POLL_EVERY;
        }
        if options.read_chunk == 0 {
            options.read_chunk = DEFAULT_READ_CHUNK;
        }
        if options.retry_backoff.is_zero() {
            options.retry_backoff = DEFAULT_RETRY_BACKOFF;
        }
        let (stop, _) = watch::channel(false);

        Tailer { options, stop }
    }

    pub fn options(&self) -> &TailOptions {
        &self.options
    }

    /// Follows the file until `shutdown` fires, [`stop`](Self::stop) is
    /// called, or `out` is closed.
    ///
    /// Sending blocks while `out` is full; lines are never dropped. A missing
    /// file and all I/O errors are retried. The only error is an empty path,
    /// reported before any I/O.
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
        out: mpsc::Sender<String>,
    ) -> Result<Exit, Error> {
        if self.options.path.as_os_str().is_empty() {
            return Err(Error::EmptyPath);
        }
        let mut stop = self.stop.subscribe();

        // Notifications only shorten the wait; polling alone is sufficient.
        let wakeups = match Wakeups::new(&self.options.path) {
            Ok(wakeups) => Some(wakeups),
            Err(e) => {
                debug!(path = %self.options.path.display(), "no filesystem notifications: {}", e);
                None
            }
        };
        let nudge = wakeups.as_ref().map(Wakeups::notifier);

        let mut follow = Follow::new(&self.options);

        loop {
            let tick = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => return Ok(Exit::Cancelled),
                _ = cancelled(&mut stop) => return Ok(Exit::Stopped),
                tick = follow.tick() => tick,
            };

            for line in tick.lines {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut shutdown) => return Ok(Exit::Cancelled),
                    _ = cancelled(&mut stop) => return Ok(Exit::Stopped),
                    sent = out.send(line) => {
                        if sent.is_err() {
                            return Ok(Exit::Closed);
                        }
                    }
                }
            }

            if tick.backlog {
                continue;
            }

            let delay = match follow.phase {
                Phase::WaitingForFile => self.options.retry_backoff,
                _ => self.options.poll_every,
            };
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => return Ok(Exit::Cancelled),
                _ = cancelled(&mut stop) => return Ok(Exit::Stopped),
                _ = tokio::time::sleep(delay) => {}
                _ = woken(nudge.as_deref()) => trace!("woken by filesystem event"),
            }
        }
    }

    /// Ends a running (or future) [`run`](Self::run). Calling it again has no
    /// further effect.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

pub(crate) async fn cancelled(signal: &mut watch::Receiver<bool>) {
    // A dropped sender can never cancel, so treat it as cancellation.
    let _ = signal.wait_for(|cancelled| *cancelled).await;
}

async fn woken(nudge: Option<&Notify>) {
    match nudge {
        Some(nudge) => nudge.notified().await,
        None => std::future::pending().await,
    }
}

/// Identity of a file, independent of its path.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct FileId(u64, u64);

impl FileId {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        FileId(meta.dev(), meta.ino())
    }

    #[cfg(not(unix))]
    fn of(meta: &Metadata) -> Self {
        use std::time::UNIX_EPOCH;
        let created = meta
            .created()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos() as u64);
        FileId(0, created)
    }
}

/// What a `stat` of the followed path reported.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct FileStamp {
    pub id: FileId,
    pub len: u64,
}

async fn stamp(path: &Path) -> Option<FileStamp> {
    let meta = fs::metadata(path).await.ok()?;
    meta.is_file().then(|| FileStamp {
        id: FileId::of(&meta),
        len: meta.len(),
    })
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Phase {
    /// Nothing opened yet; the first open honors `from_start`.
    WaitingForFile,
    /// A handle is open and positioned at `pos`.
    Tailing { id: FileId, pos: u64 },
    /// The handle was dropped. With `Some(id)`, the same file is resumed at
    /// `pos`; otherwise whatever appears at the path is read from 0.
    Reopening { id: Option<FileId>, pos: u64 },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Start {
    End,
    Offset(u64),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Step {
    /// Nothing to do this tick.
    Idle,
    /// The path is gone; drop the handle and any partial line.
    Close,
    /// (Re)open at `at`. `fresh` discards the partial line first.
    Open { at: Start, fresh: bool },
    Read,
}

impl Phase {
    pub(crate) fn step(&self, stat: Option<FileStamp>, from_start: bool) -> Step {
        let rewind = Step::Open {
            at: Start::Offset(0),
            fresh: true,
        };

        match (*self, stat) {
            (Phase::WaitingForFile, None) => Step::Idle,
            (Phase::WaitingForFile, Some(_)) => Step::Open {
                at: if from_start {
                    Start::Offset(0)
                } else {
                    Start::End
                },
                fresh: true,
            },

            (Phase::Tailing { .. }, None) => Step::Close,
            (Phase::Tailing { id, pos }, Some(stat)) if stat.id != id || stat.len < pos => rewind,
            (Phase::Tailing { .. }, Some(_)) => Step::Read,

            (Phase::Reopening { id: None, .. }, None) => Step::Idle,
            (Phase::Reopening { id: Some(_), .. }, None) => Step::Close,
            (Phase::Reopening { id: Some(id), pos }, Some(stat))
                if stat.id == id && stat.len >= pos =>
            {
                Step::Open {
                    at: Start::Offset(pos),
                    fresh: false,
                }
            }
            (Phase::Reopening { .. }, Some(_)) => rewind,
        }
    }
}

/// Result of one poll.
#[derive(Debug, Default)]
pub(crate) struct Tick {
    pub lines: Vec<String>,
    /// The read filled the whole buffer; more is probably waiting.
    pub backlog: bool,
}

/// Exclusive owner of the open handle and the carried partial line.
pub(crate) struct Follow<'a> {
    path: &'a Path,
    from_start: bool,
    pub phase: Phase,
    file: Option<File>,
    partial: Vec<u8>,
    buf: Vec<u8>,
}

impl<'a> Follow<'a> {
    pub fn new(options: &'a TailOptions) -> Self {
        Follow {
            path: &options.path,
            from_start: options.from_start,
            phase: Phase::WaitingForFile,
            file: None,
            partial: Vec::new(),
            buf: vec![0; options.read_chunk],
        }
    }

    pub async fn tick(&mut self) -> Tick {
        let stat = stamp(self.path).await;

        match self.phase.step(stat, self.from_start) {
            Step::Idle => return Tick::default(),
            Step::Close => {
                debug!(path = %self.path.display(), "file disappeared");
                self.file = None;
                self.partial.clear();
                self.phase = Phase::Reopening { id: None, pos: 0 };
                return Tick::default();
            }
            Step::Open { at, fresh } => {
                if fresh {
                    if self.file.take().is_some() {
                        debug!(path = %self.path.display(), "rotation detected, reopening from start");
                    }
                    if !self.partial.is_empty() {
                        trace!(bytes = self.partial.len(), "discarding partial line");
                    }
                    self.partial.clear();
                    if !matches!(self.phase, Phase::WaitingForFile) {
                        self.phase = Phase::Reopening { id: None, pos: 0 };
                    }
                }
                if let Err(e) = self.open(at).await {
                    debug!(path = %self.path.display(), "open failed, retrying: {}", e);
                    return Tick::default();
                }
            }
            Step::Read => {}
        }

        self.read().await
    }

    async fn open(&mut self, at: Start) -> io::Result<()> {
        let mut file = File::open(self.path).await?;
        let meta = file.metadata().await?;
        let pos = match at {
            Start::End => meta.len(),
            Start::Offset(pos) => pos,
        };
        file.seek(SeekFrom::Start(pos)).await?;

        debug!(path = %self.path.display(), pos, "opened");
        self.file = Some(file);
        self.phase = Phase::Tailing {
            id: FileId::of(&meta),
            pos,
        };

        Ok(())
    }

    async fn read(&mut self) -> Tick {
        let (Some(file), Phase::Tailing { id, pos }) = (self.file.as_mut(), self.phase) else {
            return Tick::default();
        };

        match file.read(&mut self.buf).await {
            Ok(0) => Tick::default(),
            Ok(n) => {
                self.phase = Phase::Tailing {
                    id,
                    pos: pos + n as u64,
                };
                Tick {
                    lines: split_lines(&mut self.partial, &self.buf[..n]),
                    backlog: n == self.buf.len(),
                }
            }
            Err(e) => {
                warn!(path = %self.path.display(), "read failed, reopening: {}", e);
                self.file = None;
                self.phase = Phase::Reopening { id: Some(id), pos };
                Tick::default()
            }
        }
    }
}

/// Appends `chunk` to the carried `partial` bytes and returns every line
/// completed by a `\n`, minus one trailing `\r`. Bytes after the last `\n`
/// stay in `partial`.
pub(crate) fn split_lines(partial: &mut Vec<u8>, chunk: &[u8]) -> Vec<String> {
    partial.extend_from_slice(chunk);

    let mut lines = Vec::new();
    let mut start = 0;
    for end in memchr_iter(b'\n', partial) {
        let mut line = &partial[start..end];
        if let [rest @ .., b'\r'] = line {
            line = rest;
        }
        lines.push(String::from_utf8_lossy(line).into_owned());
        start = end + 1;
    }
    partial.drain(..start);

    lines
}

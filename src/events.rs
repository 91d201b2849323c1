//! Filesystem notifications for the followed file.
//!
//! A [`notify`] watcher on the file's parent directory lets the tailer react
//! to appends, truncation and rotation without waiting out a full poll
//! interval. Watching the directory rather than the file keeps working when
//! the file does not exist yet or is replaced.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;

use crate::Error;

pub(crate) struct Wakeups {
    // Unwatches on drop.
    _watcher: RecommendedWatcher,
    nudge: Arc<Notify>,
}

impl Wakeups {
    /// Watches the directory holding `path`. Fails if that directory does not
    /// exist or cannot be watched.
    pub(crate) fn new(path: &Path) -> Result<Self, Error> {
        let path = absolutify(path)?;
        let dir = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "path has no parent directory"))?
            .to_path_buf();
        let name: OsString = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Filename not found in path"))?
            .to_os_string();

        let nudge = Arc::new(Notify::new());
        let handler_nudge = nudge.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // Errors are ignored; polling covers anything missed here.
            let Ok(event) = res else { return };
            if is_change(&event.kind)
                && event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(name.as_os_str()))
            {
                handler_nudge.notify_one();
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        Ok(Wakeups {
            _watcher: watcher,
            nudge,
        })
    }

    /// Fires (at most one stored permit) whenever the file changes.
    pub(crate) fn notifier(&self) -> Arc<Notify> {
        self.nudge.clone()
    }
}

fn is_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

/// Resolves the parent directory of `path` (symlinks included) and re-joins
/// the file name, so event paths can be compared by name.
fn absolutify(path: &Path) -> io::Result<PathBuf> {
    let dir = match path.parent() {
        None => std::env::current_dir()?,
        Some(dir) if dir == Path::new("") => std::env::current_dir()?,
        Some(dir) => dir.to_path_buf(),
    };
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Filename not found in path"))?;

    Ok(dir.canonicalize()?.join(name))
}

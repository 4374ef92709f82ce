// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable, append-only event streams.
//!
//! One [`EventLog`] owns one stream (a base path like `events.jsonl`).
//! Appends assign a monotonic `event_id`, buffer, and flush+fsync on batch
//! boundaries (count or interval). At the size cap the current file rotates
//! to the next numeric suffix (`events.jsonl.1` is the oldest); readers
//! iterate transparently across rotated files.

use crate::jsonl::recover_jsonl;
use crate::StorageError;
use amon_core::Event;
use parking_lot::Mutex;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Tuning for an event log stream.
#[derive(Debug, Clone)]
pub struct EventLogConfig {
    /// Rotate the current file once it exceeds this many bytes.
    pub rotate_max_bytes: u64,
    /// Flush after this many buffered events.
    pub flush_threshold: usize,
    /// Flush if this much time passed since the last flush.
    pub flush_interval: Duration,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            rotate_max_bytes: 64 * 1024 * 1024,
            flush_threshold: 100,
            flush_interval: Duration::from_secs(1),
        }
    }
}

struct Inner {
    writer: Option<BufWriter<fs::File>>,
    next_event_id: u64,
    current_size: u64,
    buffered: usize,
    last_flush: Instant,
}

/// A single append-only event stream with rotation.
pub struct EventLog {
    path: PathBuf,
    config: EventLogConfig,
    inner: Mutex<Inner>,
}

impl EventLog {
    /// Open (or create) a stream, recovering the tail and the last
    /// assigned `event_id`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::open_with(path, EventLogConfig::default())
    }

    pub fn open_with(
        path: impl Into<PathBuf>,
        config: EventLogConfig,
    ) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        recover_jsonl(&path)?;

        let current_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let last_id = last_event_id(&path)?
            .or_else(|| {
                newest_rotated(&path).and_then(|p| last_event_id(&p).ok().flatten())
            })
            .unwrap_or(0);

        Ok(Self {
            path,
            config,
            inner: Mutex::new(Inner {
                writer: None,
                next_event_id: last_id + 1,
                current_size,
                buffered: 0,
                last_flush: Instant::now(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event, assigning its stream id. Returns the id.
    pub fn append(&self, mut event: Event) -> Result<u64, StorageError> {
        let mut inner = self.inner.lock();
        let id = inner.next_event_id;
        event.event_id = id;
        let line = serde_json::to_string(&event)?;

        if inner.current_size + line.len() as u64 + 1 > self.config.rotate_max_bytes
            && inner.current_size > 0
        {
            self.rotate(&mut inner)?;
        }

        if inner.writer.is_none() {
            let file = fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
            inner.writer = Some(BufWriter::new(file));
        }
        let written = line.len() as u64 + 1;
        if let Some(w) = inner.writer.as_mut() {
            w.write_all(line.as_bytes())?;
            w.write_all(b"\n")?;
        }
        inner.next_event_id = id + 1;
        inner.current_size += written;
        inner.buffered += 1;

        if inner.buffered >= self.config.flush_threshold
            || inner.last_flush.elapsed() >= self.config.flush_interval
        {
            Self::flush_inner(&mut inner)?;
        }
        Ok(id)
    }

    /// Flush buffered events and fsync.
    pub fn flush(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        Self::flush_inner(&mut inner)
    }

    fn flush_inner(inner: &mut Inner) -> Result<(), StorageError> {
        if let Some(w) = inner.writer.as_mut() {
            w.flush()?;
            w.get_ref().sync_all()?;
        }
        inner.buffered = 0;
        inner.last_flush = Instant::now();
        Ok(())
    }

    fn rotate(&self, inner: &mut Inner) -> Result<(), StorageError> {
        if let Some(mut w) = inner.writer.take() {
            w.flush()?;
            w.get_ref().sync_all()?;
        }
        let next = next_rotation_index(&self.path);
        fs::rename(&self.path, rotated_path(&self.path, next))?;
        inner.current_size = 0;
        tracing::info!(path = %self.path.display(), suffix = next, "rotated event log");
        Ok(())
    }

    /// The id the next appended event will receive.
    pub fn head_event_id(&self) -> u64 {
        self.inner.lock().next_event_id - 1
    }

    /// Forward iteration: events with `event_id > since`, oldest first,
    /// capped at `limit`.
    pub fn read_since(&self, since: u64, limit: usize) -> Result<Vec<Event>, StorageError> {
        self.flush()?;
        let mut out = Vec::new();
        for file in self.files_oldest_first() {
            for event in read_events(&file)? {
                if event.event_id > since {
                    out.push(event);
                    if out.len() >= limit {
                        return Ok(out);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Reverse windowing for UI queries: page 0 is the newest
    /// `page_size` events, returned oldest-first within the page.
    pub fn read_page(&self, page: usize, page_size: usize) -> Result<Vec<Event>, StorageError> {
        self.flush()?;
        let mut all = Vec::new();
        for file in self.files_oldest_first() {
            all.extend(read_events(&file)?);
        }
        let total = all.len();
        let end = total.saturating_sub(page * page_size);
        let start = end.saturating_sub(page_size);
        Ok(all[start..end].to_vec())
    }

    /// All events matching a predicate (flushes first).
    pub fn read_filtered(
        &self,
        mut pred: impl FnMut(&Event) -> bool,
    ) -> Result<Vec<Event>, StorageError> {
        self.flush()?;
        let mut out = Vec::new();
        for file in self.files_oldest_first() {
            for event in read_events(&file)? {
                if pred(&event) {
                    out.push(event);
                }
            }
        }
        Ok(out)
    }

    fn files_oldest_first(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut n = 1u32;
        loop {
            let rotated = rotated_path(&self.path, n);
            if !rotated.exists() {
                break;
            }
            files.push(rotated);
            n += 1;
        }
        if self.path.exists() {
            files.push(self.path.clone());
        }
        files
    }
}

fn rotated_path(base: &Path, n: u32) -> PathBuf {
    let mut os = base.as_os_str().to_os_string();
    os.push(format!(".{n}"));
    PathBuf::from(os)
}

fn next_rotation_index(base: &Path) -> u32 {
    let mut n = 1;
    while rotated_path(base, n).exists() {
        n += 1;
    }
    n
}

fn newest_rotated(base: &Path) -> Option<PathBuf> {
    let mut newest = None;
    let mut n = 1;
    loop {
        let p = rotated_path(base, n);
        if !p.exists() {
            break;
        }
        newest = Some(p);
        n += 1;
    }
    newest
}

fn last_event_id(path: &Path) -> Result<Option<u64>, StorageError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    for line in content.lines().rev() {
        if let Ok(event) = serde_json::from_str::<Event>(line) {
            return Ok(Some(event.event_id));
        }
    }
    Ok(None)
}

fn read_events(path: &Path) -> Result<Vec<Event>, StorageError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    // Tolerate concurrent appends: stop at the first line that doesn't
    // parse (it may still be in flight).
    let mut out = Vec::new();
    for line in content.lines() {
        match serde_json::from_str::<Event>(line) {
            Ok(event) => out.push(event),
            Err(_) => break,
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "event_log_tests.rs"]
mod tests;

//! Event Log & Broadcast (C9, spec §4.9).
//!
//! An append-only, per-repository JSONL log of [`Event`]s plus a best-effort
//! fan-out to subscribers. Appends are atomic (single `write` syscall per
//! line, file opened in append mode) and broadcasts never block the caller:
//! a subscriber whose channel is full or disconnected is silently dropped,
//! never allowed to stall the scheduler.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Mutex;

use crate::model::types::Event;

/// Append-only event log for one repository, plus fan-out broadcast.
pub struct EventLog {
    path: PathBuf,
    file: Mutex<File>,
    subscribers: Mutex<Vec<Sender<Event>>>,
}

impl EventLog {
    /// Open (creating if absent) the event log file at `path`.
    ///
    /// # Errors
    /// Returns the I/O error if the file can't be opened or created.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Append `event` to the log and broadcast it to every live subscriber.
    ///
    /// The append is the source of truth; broadcast failures (full/closed
    /// channels) are dropped, never escalated — per spec §4.9, "best-effort,
    /// non-blocking".
    ///
    /// # Errors
    /// Returns the I/O error if the append itself fails. A broadcast failure
    /// never produces an error.
    pub fn append(&self, event: &Event) -> io::Result<()> {
        let json = serde_json::to_string(event)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        writeln!(file, "{json}")?;
        file.flush()?;
        drop(file);

        let mut subs = self.subscribers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        subs.retain(|tx| tx.send(event.clone()).is_ok());
        Ok(())
    }

    /// Register a new subscriber; returns the receiving end of its channel.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut subs = self.subscribers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        subs.push(tx);
        rx
    }

    /// Replay every event recorded since `cursor` (0-based line index into
    /// the log), in order.
    ///
    /// # Errors
    /// Returns the I/O error if the log file can't be read. Lines that fail
    /// to parse are skipped rather than aborting the replay.
    pub fn replay_since(&self, cursor: usize) -> io::Result<Vec<Event>> {
        let _lock = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let reader = io::BufReader::new(File::open(&self.path)?);
        let events = reader
            .lines()
            .skip(cursor)
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();
        Ok(events)
    }

    /// Total number of events appended so far (the next valid cursor).
    ///
    /// # Errors
    /// Returns the I/O error if the log file can't be read.
    pub fn len(&self) -> io::Result<usize> {
        let _lock = self.file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let reader = io::BufReader::new(File::open(&self.path)?);
        Ok(reader.lines().count())
    }

    /// `true` if no events have been appended yet.
    ///
    /// # Errors
    /// Returns the I/O error if the log file can't be read.
    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

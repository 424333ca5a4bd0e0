//! Restart-survivable keep-alive deadline.
//!
//! The deadline is wall-clock UNIX milliseconds so it stays meaningful across
//! process restarts. It is stored as a one-key TOML document:
//!
//! ```toml
//! deadline_ms = 1700000012345
//! ```
//!
//! A missing store reads as expired; a restart never grants a fresh grace
//! period.

use crate::config::KeepAliveCfg;
use crate::error::BmsError;
use std::path::{Path, PathBuf};
use std::{fs, io::Write};

/// Write `bytes` to `path` via a temporary file, fsync and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

/// Read a stored deadline. `Ok(None)` when the file does not exist.
pub fn read_deadline(path: &Path) -> Result<Option<u64>, BmsError> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BmsError::Io(format!("read {}: {e}", path.display()))),
    };
    let table: toml::Table = toml::from_str(&text)
        .map_err(|e| BmsError::Io(format!("parse {}: {e}", path.display())))?;
    match table.get("deadline_ms").and_then(toml::Value::as_integer) {
        Some(ms) if ms >= 0 => Ok(Some(ms as u64)),
        _ => Err(BmsError::Io(format!(
            "{}: missing or negative deadline_ms",
            path.display()
        ))),
    }
}

pub fn write_deadline(path: &Path, deadline_ms: u64) -> Result<(), BmsError> {
    // TOML integers are i64
    let ms = deadline_ms.min(i64::MAX as u64);
    write_atomic(path, format!("deadline_ms = {ms}\n").as_bytes())
        .map_err(|e| BmsError::Io(format!("write {}: {e}", path.display())))
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeepAlive {
    k_ms: u64,
    path: Option<PathBuf>,
    deadline_ms: Option<u64>,
    /// Last deadline seen in (or written to) the store, before clamping.
    stored_raw: Option<u64>,
}

impl KeepAlive {
    /// A keep-alive with no deadline yet (expired unless disabled).
    pub fn new(cfg: &KeepAliveCfg) -> Self {
        Self {
            k_ms: cfg.k_ms,
            path: cfg.path.clone(),
            deadline_ms: None,
            stored_raw: None,
        }
    }

    /// Load the persisted deadline, clamped to `now + k`.
    ///
    /// An unreadable store is logged and treated as expired.
    pub fn load(cfg: &KeepAliveCfg, now_ms: u64) -> Self {
        let mut ka = Self::new(cfg);
        if let Err(e) = ka.refresh_from_store(now_ms) {
            tracing::warn!(error = %e, "keep-alive store unreadable; treating as expired");
        }
        ka
    }

    pub fn is_enabled(&self) -> bool {
        self.k_ms > 0
    }

    pub fn period_ms(&self) -> u64 {
        self.k_ms
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.deadline_ms
    }

    /// Expired when enabled and the deadline is absent or reached.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.is_enabled() && self.deadline_ms.is_none_or(|d| now_ms >= d)
    }

    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        if !self.is_enabled() {
            return None;
        }
        Some(self.deadline_ms.map_or(0, |d| d.saturating_sub(now_ms)))
    }

    /// Extend the deadline to `now + k` and persist it.
    pub fn renew(&mut self, now_ms: u64) -> Result<u64, BmsError> {
        self.renew_until(now_ms, now_ms.saturating_add(self.k_ms))
    }

    /// Accept an externally supplied deadline, never beyond `now + k`.
    pub fn renew_until(&mut self, now_ms: u64, deadline_ms: u64) -> Result<u64, BmsError> {
        if !self.is_enabled() {
            return Err(BmsError::ConfigInvalid(
                "keep-alive disabled (poll.k = 0)".into(),
            ));
        }
        let deadline = deadline_ms.min(now_ms.saturating_add(self.k_ms));
        if let Some(path) = &self.path {
            write_deadline(path, deadline)?;
            self.stored_raw = Some(deadline);
        }
        self.deadline_ms = Some(deadline);
        tracing::debug!(deadline_ms = deadline, "keep-alive renewed");
        Ok(deadline)
    }

    /// Pick up renewals written by another process. Returns true when the
    /// in-memory deadline changed. Without a store this is a no-op.
    ///
    /// Only a new write is accepted, clamped to `now + k` at the time it is
    /// first seen; it replaces the current deadline even when earlier. An
    /// unchanged store is never clamped again, so a far-future value still
    /// lapses `k` after it was read. A removed store keeps the deadline.
    pub fn refresh_from_store(&mut self, now_ms: u64) -> Result<bool, BmsError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        if !self.is_enabled() {
            return Ok(false);
        }
        let raw = read_deadline(path)?;
        if raw == self.stored_raw {
            return Ok(false);
        }
        self.stored_raw = raw;
        let Some(raw) = raw else {
            return Ok(false);
        };
        let next = Some(raw.min(now_ms.saturating_add(self.k_ms)));
        let changed = next != self.deadline_ms;
        self.deadline_ms = next;
        Ok(changed)
    }
}

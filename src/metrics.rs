// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Throttled metric log files for a [`Recovery`](crate::recovery::Recovery) instance.
//!
//! Disabled by default; enabled via [`RecoveryConfig::with_logging`](crate::config::RecoveryConfig::with_logging).
//! Requires the `std` feature — there is no allocator-only fallback, since
//! this is file I/O, not a core data structure.

use crate::{
    config::Role,
    congestion::CongestionController,
    error::RecoveryError,
    time::Timestamp,
};
use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

const K_LOG_INTERVAL: Duration = Duration::from_millis(10);

struct ThrottledWriter {
    file: File,
    last_write: Option<Timestamp>,
}

impl ThrottledWriter {
    fn open(path: &Path) -> Result<Self, RecoveryError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| RecoveryError::LogFileOpen {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self {
            file,
            last_write: None,
        })
    }

    /// Writes `line` unless less than `K_LOG_INTERVAL` has elapsed since the
    /// last successful write to this file.
    fn write_throttled(&mut self, now: Timestamp, line: core::fmt::Arguments<'_>) {
        if let Some(last) = self.last_write {
            if now.saturating_duration_since(last) < K_LOG_INTERVAL {
                return;
            }
        }

        match self.file.write_fmt(line) {
            Ok(()) => self.last_write = Some(now),
            Err(source) => trace_write_failure(&RecoveryError::LogWrite { source }),
        }
    }
}

#[cfg(feature = "tracing")]
fn trace_write_failure(error: &RecoveryError) {
    tracing::warn!(%error, "continuing without retry");
}

#[cfg(not(feature = "tracing"))]
fn trace_write_failure(_error: &RecoveryError) {}

/// Owns a connection's `window.log`/`latency.log`/`loss.log` files and
/// releases them deterministically when dropped.
pub struct Metrics {
    created_at: Timestamp,
    window: ThrottledWriter,
    latency: ThrottledWriter,
    loss: ThrottledWriter,
}

impl Metrics {
    /// Opens the three log files under the next free
    /// `logs/{label}/{role}/{c|s}<N>/` directory.
    pub fn open(label: &str, role: Role, now: Timestamp) -> Result<Self, RecoveryError> {
        let base = PathBuf::from("logs").join(label).join(role.label());
        let prefix = match role {
            Role::Client => "c",
            Role::Server => "s",
        };
        let dir = next_path(&base, prefix)?;

        fs::create_dir_all(&dir).map_err(|source| RecoveryError::LogDirectoryCreation {
            path: dir.display().to_string(),
            source,
        })?;

        Ok(Self {
            created_at: now,
            window: ThrottledWriter::open(&dir.join("window.log"))?,
            latency: ThrottledWriter::open(&dir.join("latency.log"))?,
            loss: ThrottledWriter::open(&dir.join("loss.log"))?,
        })
    }

    fn elapsed_secs(&self, now: Timestamp) -> f64 {
        now.saturating_duration_since(self.created_at).as_secs_f64()
    }

    pub fn log_window(&mut self, cc: &dyn CongestionController, now: Timestamp, _event: &str) {
        let t = self.elapsed_secs(now);
        self.window
            .write_throttled(now, format_args!("{} {t}\n", cc.congestion_window()));
    }

    pub fn log_latency(&mut self, latest_rtt: Duration, smoothed_rtt: Duration, now: Timestamp) {
        let t = self.elapsed_secs(now);
        self.latency.write_throttled(
            now,
            format_args!("{} {} {t}\n", latest_rtt.as_secs_f64(), smoothed_rtt.as_secs_f64()),
        );
    }

    pub fn log_loss(&mut self, cc: &dyn CongestionController, now: Timestamp) {
        let t = self.elapsed_secs(now);
        self.loss
            .write_throttled(now, format_args!("{} {} {t}\n", cc.loss_count(), cc.loss_bytes()));
    }
}

/// Finds the first index `n` (starting at 1, never 0) such that
/// `base/{prefix}{n}` does not yet exist, via an exponential search for an
/// upper bound followed by a binary search for the exact boundary.
/// Read-only with respect to the filesystem; the caller is responsible for
/// creating the chosen directory immediately to reserve it.
fn next_path(base: &Path, prefix: &str) -> Result<PathBuf, RecoveryError> {
    let exists = |n: u32| base.join(format!("{prefix}{n}")).exists();

    let mut hi = 1u32;
    const MAX_ATTEMPTS: u32 = 1 << 20;
    while exists(hi) {
        if hi >= MAX_ATTEMPTS {
            return Err(RecoveryError::LogDirectoryExhausted {
                base: base.display().to_string(),
                attempts: hi,
            });
        }
        hi = hi.saturating_mul(2);
    }

    let mut lo = hi / 2;
    while lo + 1 < hi {
        let mid = lo + (hi - lo) / 2;
        if exists(mid) {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    Ok(base.join(format!("{prefix}{hi}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_path_skips_existing_directories() {
        let tmp = std::env::temp_dir().join(format!(
            "quic-recovery-core-test-{}",
            std::process::id()
        ));
        let base = tmp.join("reno").join("server");
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(base.join("s1")).unwrap();
        fs::create_dir_all(base.join("s2")).unwrap();
        fs::create_dir_all(base.join("s3")).unwrap();

        let chosen = next_path(&base, "s").unwrap();
        assert_eq!(chosen, base.join("s4"));

        fs::remove_dir_all(&tmp).unwrap();
    }

    #[test]
    fn next_path_picks_one_when_empty() {
        let tmp = std::env::temp_dir().join(format!(
            "quic-recovery-core-test-empty-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&tmp);
        let chosen = next_path(&tmp, "c").unwrap();
        assert_eq!(chosen, tmp.join("c1"));
    }
}

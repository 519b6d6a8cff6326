//! Windowed throughput accounting, one entry per client identity.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Upper bound on retained samples per client; older ones are evicted.
const WINDOW_CAP: usize = 100;

#[derive(Debug, Clone, Copy)]
struct Sample {
    completed_at: Instant,
    files: u64,
    elapsed: Duration,
}

/// Throughput bookkeeping for one client identity. Multiple connections
/// announcing the same name share an entry; `connections` counts how many
/// are currently attached.
#[derive(Debug, Default)]
pub struct ClientStats {
    window: VecDeque<Sample>,
    total_files: u64,
    connections: usize,
}

/// Point-in-time rate for one client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    pub files_per_second: f64,
    pub total_files: u64,
}

impl ClientStats {
    /// Record a finished batch: `files` produced over `elapsed`, done at
    /// `completed_at`.
    pub fn record(&mut self, completed_at: Instant, files: u64, elapsed: Duration) {
        if self.window.len() == WINDOW_CAP {
            self.window.pop_front();
        }
        self.window.push_back(Sample {
            completed_at,
            files,
            elapsed,
        });
        self.total_files += files;
    }

    pub fn connections(&self) -> usize {
        self.connections
    }

    pub fn total_files(&self) -> u64 {
        self.total_files
    }

    /// Files-per-second over the trailing `window` ending at `now`.
    ///
    /// Samples are scanned newest first; the first sample completed before
    /// the cutoff ends the scan. A sample whose work started before the
    /// cutoff only contributes the share of its files that falls inside the
    /// window.
    pub fn rate(&self, now: Instant, window: Duration) -> Rate {
        let cutoff = now.checked_sub(window);
        let mut in_window = 0.0f64;
        for sample in self.window.iter().rev() {
            match cutoff {
                // The window reaches past the start of the clock.
                None => in_window += sample.files as f64,
                Some(cutoff) => {
                    if sample.completed_at < cutoff {
                        break;
                    }
                    let started = sample.completed_at.checked_sub(sample.elapsed);
                    let started_before_window = started.map_or(true, |s| s < cutoff);
                    if started_before_window && !sample.elapsed.is_zero() {
                        let overlap = sample.completed_at - cutoff;
                        in_window += sample.files as f64 * overlap.as_secs_f64()
                            / sample.elapsed.as_secs_f64();
                    } else {
                        in_window += sample.files as f64;
                    }
                }
            }
        }
        let files_per_second = if window.is_zero() {
            0.0
        } else {
            in_window / window.as_secs_f64()
        };
        Rate {
            files_per_second,
            total_files: self.total_files,
        }
    }
}

/// One client's line in the periodic throughput report.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    pub name: String,
    pub connections: usize,
    pub rate: Rate,
}

/// Shared map of per-client stats, updated by the connection tasks and read
/// by the periodic reporter.
#[derive(Default)]
pub struct StatsRegistry {
    clients: RwLock<HashMap<String, ClientStats>>,
}

impl StatsRegistry {
    pub fn attach(&self, name: &str) {
        self.clients
            .write()
            .entry(name.to_string())
            .or_default()
            .connections += 1;
    }

    pub fn detach(&self, name: &str) {
        if let Some(client) = self.clients.write().get_mut(name) {
            client.connections = client.connections.saturating_sub(1);
        }
    }

    pub fn record(&self, name: &str, files: u64, elapsed: Duration) {
        self.clients
            .write()
            .entry(name.to_string())
            .or_default()
            .record(Instant::now(), files, elapsed);
    }

    /// Consistent snapshot of every known client, rated over `window`.
    pub fn snapshot(&self, window: Duration) -> Vec<ClientSnapshot> {
        let now = Instant::now();
        self.clients
            .read()
            .iter()
            .map(|(name, stats)| ClientSnapshot {
                name: name.clone(),
                connections: stats.connections,
                rate: stats.rate(now, window),
            })
            .collect()
    }
}

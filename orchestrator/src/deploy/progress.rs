//! Docker pull progress parser
//!
//! Turns compose/pull output lines such as
//! `e756f3fdd6a3 Downloading [===>   ] 1.5MB/10.0MB` into a smoothed,
//! strictly increasing completion percentage.

use std::collections::{HashMap, VecDeque};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*([a-f0-9]{12})\s+(Downloading|Extracting)\s+\[.*\]\s+([\d.]+[kKmMgG]?[bB])/([\d.]+[kKmMgG]?[bB])",
    )
    .expect("progress line regex is valid")
});

pub const DEFAULT_HISTORY_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
struct LayerProgress {
    current: u64,
    total: u64,
}

#[derive(Debug)]
pub struct DockerProgressParser {
    layers: HashMap<String, LayerProgress>,
    history: VecDeque<u64>,
    history_size: usize,
    last_emitted: u64,
}

impl DockerProgressParser {
    pub fn new(history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            layers: HashMap::new(),
            history: VecDeque::with_capacity(history_size),
            history_size,
            last_emitted: 0,
        }
    }

    /// Feed one log line. Returns the new smoothed percentage only when it is
    /// strictly greater than the last one returned.
    pub fn parse(&mut self, line: &str) -> Option<u64> {
        let (layer_id, current, total) = parse_progress_line(line)?;
        self.layers
            .insert(layer_id, LayerProgress { current, total });

        if self.history.len() == self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(self.raw_percentage());

        let sum: f64 = self.history.iter().map(|v| *v as f64).sum();
        let smoothed = (sum / self.history.len() as f64) as u64;

        if smoothed > self.last_emitted {
            self.last_emitted = smoothed;
            return Some(smoothed);
        }
        None
    }

    fn raw_percentage(&self) -> u64 {
        let (current, total) = self
            .layers
            .values()
            .fold((0u64, 0u64), |(c, t), layer| {
                (c.saturating_add(layer.current), t.saturating_add(layer.total))
            });
        if total == 0 {
            return 0;
        }
        ((current as f64 / total as f64) * 100.0) as u64
    }
}

impl Default for DockerProgressParser {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

fn parse_progress_line(line: &str) -> Option<(String, u64, u64)> {
    let captures = PROGRESS_LINE.captures(line)?;
    let layer_id = captures.get(1)?.as_str().to_string();
    let current = parse_bytes(captures.get(3)?.as_str());
    let total = parse_bytes(captures.get(4)?.as_str());
    match (current, total) {
        (Some(current), Some(total)) => Some((layer_id, current, total)),
        _ => {
            warn!(line, "could not parse sizes from docker progress line");
            None
        }
    }
}

/// Sizes like `512.0kB`, `1.5MB`, `2GB` or `900B`; units are powers of 1024
fn parse_bytes(s: &str) -> Option<u64> {
    let s = s.trim().to_ascii_lowercase();
    let (value, multiplier) = if let Some(v) = s.strip_suffix("kb") {
        (v, 1024.0)
    } else if let Some(v) = s.strip_suffix("mb") {
        (v, 1024.0 * 1024.0)
    } else if let Some(v) = s.strip_suffix("gb") {
        (v, 1024.0 * 1024.0 * 1024.0)
    } else if let Some(v) = s.strip_suffix('b') {
        (v, 1.0)
    } else {
        (s.as_str(), 1.0)
    };
    let value: f64 = value.parse().ok()?;
    Some((value * multiplier) as u64)
}

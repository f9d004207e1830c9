#![forbid(unsafe_code)]

//! Evidence records for explainable bias and band decisions.
//!
//! Each record serializes to a single JSON object, one per line, so a
//! ledger can be streamed to a JSONL file or a log collector as-is.

use std::collections::VecDeque;

use serde::Serialize;

use crate::cusum::Signal;

/// Which input stream a controller step came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    /// Lambda z-score stream, centered at 2.0.
    Lambda,
    /// Realized precision error stream, fed uncentered.
    Ppv,
}

impl Stream {
    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Lambda => "lambda",
            Stream::Ppv => "ppv",
        }
    }
}

/// One controller step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiasEvidence {
    /// 1-based step index across both streams.
    pub step_idx: u64,
    pub stream: Stream,
    /// Observation as passed by the caller.
    pub input: f64,
    /// Observation after centering (what the detector saw).
    pub centered: f64,
    /// Stress accumulator after the step.
    pub gp: f64,
    /// Calm accumulator after the step.
    pub gn: f64,
    pub signal: Signal,
    pub bias_before: f64,
    pub bias_after: f64,
    /// The bump was cut short by a clamp bound.
    pub clamped: bool,
}

/// Inputs and intermediate quantiles behind one band.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandEvidence {
    pub hazard_raw: f64,
    pub lower: f64,
    pub upper: f64,
    /// Upper-tail quantile of the negative-outcome window.
    pub miss_noise: f64,
    /// Upper-tail quantile of the positive-outcome window.
    pub hit_overshoot: f64,
    pub positive_len: usize,
    pub negative_len: usize,
    /// Both windows were empty and the fixed-ratio band was used.
    pub fallback: bool,
}

/// Serialize a record to one JSON line.
pub fn to_jsonl<T: Serialize>(record: &T) -> String {
    // Records hold only numbers, enums and bools.
    serde_json::to_string(record).unwrap_or_else(|_| String::from("{}"))
}

impl BiasEvidence {
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        to_jsonl(self)
    }
}

impl BandEvidence {
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        to_jsonl(self)
    }
}

/// Bounded ring of evidence records; the oldest record is dropped first.
#[derive(Debug, Clone)]
pub struct Ledger<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> Ledger<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.capacity == 0 {
            return;
        }
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn last(&self) -> Option<&T> {
        self.entries.back()
    }
}

//! Measurement boundary.
//!
//! A harness turns a fused function and its stream schedule into a latency.
//! Code emission, compilation and execution all happen behind
//! [`MeasurementHarness`]; the search only reads the average.

mod command;
mod timing;

pub use command::CommandHarness;
pub use timing::TimingParser;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::ir::Function;
use crate::schedule::StreamSchedule;

/// Latency statistics of one run, in the unit printed by the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl Measurement {
    /// Statistics over `samples`; `None` when empty.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let sum: f64 = samples.iter().sum();
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            avg: sum / samples.len() as f64,
            min,
            max,
        })
    }
}

/// What gets built and run for one step.
#[derive(Debug, Clone, Serialize)]
pub struct MeasureRequest<'a> {
    /// Unique per step, usable as a file stem.
    pub label: String,
    pub function: &'a Function,
    pub schedule: &'a StreamSchedule,
}

pub trait MeasurementHarness {
    /// Build and run the request, blocking until it finishes.
    fn measure(&mut self, request: &MeasureRequest<'_>) -> Result<Measurement, HarnessError>;
}

impl<H: MeasurementHarness + ?Sized> MeasurementHarness for Box<H> {
    fn measure(&mut self, request: &MeasureRequest<'_>) -> Result<Measurement, HarnessError> {
        (**self).measure(request)
    }
}

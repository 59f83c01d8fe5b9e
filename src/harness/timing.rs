use regex::Regex;

use super::Measurement;
use crate::error::HarnessError;

/// Extracts latency samples from run output.
///
/// Every match of the pattern contributes the value of its first capture
/// group; captures that do not parse as a number are skipped.
#[derive(Debug, Clone)]
pub struct TimingParser {
    regex: Regex,
}

impl TimingParser {
    pub fn new(pattern: &str) -> Result<Self, HarnessError> {
        let regex = Regex::new(pattern).map_err(|source| HarnessError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex })
    }

    pub fn samples(&self, output: &str) -> Vec<f64> {
        self.regex
            .captures_iter(output)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| m.as_str().parse().ok())
            .collect()
    }

    pub fn parse(&self, output: &str) -> Result<Measurement, HarnessError> {
        Measurement::from_samples(&self.samples(output)).ok_or(HarnessError::MissingTiming)
    }
}

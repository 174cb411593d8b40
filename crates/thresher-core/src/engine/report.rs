//! Pass-rate summaries for named filters.

use std::fmt;

use serde::Serialize;

/// Aggregated statistics of one named filter, summed across slots.
#[derive(Debug, Clone, Serialize)]
pub struct FilterSummary {
    pub name: String,
    /// Entries the predicate accepted.
    pub passed: u64,
    /// Entries the predicate saw.
    pub all: u64,
}

impl FilterSummary {
    pub fn rejected(&self) -> u64 {
        self.all - self.passed
    }

    /// Pass rate in percent; 0 when the filter never saw an entry.
    pub fn percentage(&self) -> f64 {
        if self.all == 0 {
            0.0
        } else {
            self.passed as f64 / self.all as f64 * 100.0
        }
    }
}

impl fmt::Display for FilterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: pass={} all={} -- {:.3} %",
            self.name,
            self.passed,
            self.all,
            self.percentage()
        )
    }
}

/// Summaries of every named filter, in registration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    summaries: Vec<FilterSummary>,
}

impl Report {
    pub(crate) fn new(summaries: Vec<FilterSummary>) -> Self {
        Self { summaries }
    }

    pub fn summaries(&self) -> &[FilterSummary] {
        &self.summaries
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for summary in &self.summaries {
            writeln!(f, "{summary}")?;
        }
        Ok(())
    }
}

//! Ingestion Run Report
//!
//! Informational run summary: record counts, failed batches, and the largest
//! strata by point count.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;

/// A batch that failed to persist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub batch: usize,
    pub points: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratumCount {
    pub stratum: String,
    pub count: usize,
}

/// Top `n` strata by point count, ties broken by key
pub fn top_strata(counts: &HashMap<String, usize>, n: usize) -> Vec<StratumCount> {
    let mut ranked: Vec<StratumCount> = counts
        .iter()
        .map(|(stratum, count)| StratumCount {
            stratum: stratum.clone(),
            count: *count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.stratum.cmp(&b.stratum)));
    ranked.truncate(n);
    ranked
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionReport {
    /// Records consumed from the input
    pub processed: usize,
    /// Records without usable ground truth
    pub skipped: usize,
    /// Points committed to the store
    pub inserted: usize,
    /// Validated records with no human reviewer
    pub auto_validated: usize,
    pub errors: Vec<BatchFailure>,
    pub top_strata: Vec<StratumCount>,
    pub dry_run: bool,
}

impl IngestionReport {
    /// Points that were built but lost to failed batches
    pub fn failed_points(&self) -> usize {
        self.errors.iter().map(|e| e.points).sum()
    }

    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let mode = if self.dry_run { " (dry run)" } else { "" };
        let _ = writeln!(out, "Calibration ingestion{}", mode);
        let _ = writeln!(out, "  processed:      {}", self.processed);
        let _ = writeln!(out, "  skipped:        {}", self.skipped);
        let _ = writeln!(out, "  inserted:       {}", self.inserted);
        let _ = writeln!(out, "  auto-validated: {}", self.auto_validated);

        if self.is_partial() {
            let _ = writeln!(
                out,
                "  failed batches: {} ({} points)",
                self.errors.len(),
                self.failed_points()
            );
            for failure in &self.errors {
                let _ = writeln!(out, "    batch {}: {}", failure.batch, failure.message);
            }
        }

        if !self.top_strata.is_empty() {
            let _ = writeln!(out, "  top strata:");
            for entry in &self.top_strata {
                let _ = writeln!(out, "    {:>6}  {}", entry.count, entry.stratum);
            }
        }

        out
    }
}

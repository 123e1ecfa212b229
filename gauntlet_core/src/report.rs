use crate::orchestrator::FuzzOrchestrator;
use crate::outcome::ErrorKind;
use serde::Serialize;
use std::fmt;

/// One line of a target's error histogram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorCount {
    pub signature: String,
    pub count: usize,
}

/// How often one error kind was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindCount {
    pub kind: ErrorKind,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub name: String,
    pub total_run: usize,
    pub total_pass: usize,
    pub total_fail: usize,
    /// Error kind histogram, sorted by descending count.
    pub kind_counts: Vec<KindCount>,
    /// Full signatures, sorted by descending count.
    pub error_counts: Vec<ErrorCount>,
}

/// A snapshot of everything an orchestrator has fuzzed so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FuzzReport {
    pub total_fuzzed_targets: usize,
    pub total_run: usize,
    pub total_pass: usize,
    pub total_fail: usize,
    pub per_target: Vec<TargetReport>,
}

impl FuzzReport {
    pub fn from_orchestrator(orchestrator: &FuzzOrchestrator) -> Self {
        let totals = orchestrator.totals();
        let per_target: Vec<TargetReport> = orchestrator
            .target_totals()
            .iter()
            .map(|target| TargetReport {
                name: target.name.clone(),
                total_run: target.total_run,
                total_pass: target.total_pass,
                total_fail: target.total_fail,
                kind_counts: target
                    .errors
                    .kinds_sorted_desc()
                    .into_iter()
                    .map(|(kind, count)| KindCount { kind, count })
                    .collect(),
                error_counts: target
                    .errors
                    .sorted_desc()
                    .into_iter()
                    .map(|(signature, count)| ErrorCount {
                        signature: signature.to_owned(),
                        count,
                    })
                    .collect(),
            })
            .collect();

        Self {
            total_fuzzed_targets: per_target.len(),
            total_run: totals.total_fuzzes_run,
            total_pass: totals.total_fuzzes_passed,
            total_fail: totals.total_fuzzes_failed,
            per_target,
        }
    }

    pub fn has_findings(&self) -> bool {
        self.total_fail > 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for FuzzReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fuzzing Report:")?;
        writeln!(f, "  Targets fuzzed:  {}", self.total_fuzzed_targets)?;
        writeln!(f, "  Total fuzzes:    {}", self.total_run)?;
        writeln!(f, "  Passed:          {}", self.total_pass)?;
        writeln!(f, "  Failed:          {}", self.total_fail)?;

        for target in &self.per_target {
            writeln!(f)?;
            writeln!(
                f,
                "  {} ({} run, {} passed, {} failed)",
                target.name, target.total_run, target.total_pass, target.total_fail
            )?;
            if target.kind_counts.is_empty() {
                writeln!(f, "    no errors")?;
                continue;
            }
            writeln!(f, "    by kind:")?;
            for entry in &target.kind_counts {
                writeln!(f, "    {:>6}  {}", entry.count, entry.kind)?;
            }
            writeln!(f, "    by message:")?;
            for entry in &target.error_counts {
                writeln!(f, "    {:>6}  {}", entry.count, first_line(&entry.signature))?;
            }
        }
        Ok(())
    }
}

/// Keeps multi-line messages on a single report row.
fn first_line(signature: &str) -> &str {
    signature.lines().next().unwrap_or("")
}

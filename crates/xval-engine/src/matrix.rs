//! Result matrix: client → validator → verdict.

use crate::verdict::RunVerdict;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Verdicts of a sweep, keyed by client then validator.
///
/// Each cell is written at most once.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ResultMatrix {
    cells: BTreeMap<String, BTreeMap<String, RunVerdict>>,
}

/// A second verdict arrived for a cell that is already filled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("duplicate verdict for client '{client}' under validator '{validator}'")]
pub struct DuplicateCell {
    pub client: String,
    pub validator: String,
}

impl ResultMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the verdict for `(client, validator)`.
    pub fn record(
        &mut self,
        client: &str,
        validator: &str,
        verdict: RunVerdict,
    ) -> Result<(), DuplicateCell> {
        let row = self.cells.entry(client.to_string()).or_default();
        if row.contains_key(validator) {
            return Err(DuplicateCell {
                client: client.to_string(),
                validator: validator.to_string(),
            });
        }
        row.insert(validator.to_string(), verdict);
        Ok(())
    }

    pub fn get(&self, client: &str, validator: &str) -> Option<&RunVerdict> {
        self.cells.get(client)?.get(validator)
    }

    /// Client identifiers, sorted.
    pub fn clients(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    /// Validator identifiers appearing in any row, sorted and deduplicated.
    pub fn validators(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .cells
            .values()
            .flat_map(|row| row.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Iterate `(client, validator, verdict)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &RunVerdict)> {
        self.cells.iter().flat_map(|(client, row)| {
            row.iter()
                .map(move |(validator, verdict)| (client.as_str(), validator.as_str(), verdict))
        })
    }

    /// Number of clients (rows).
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of filled cells.
    pub fn cell_count(&self) -> usize {
        self.cells.values().map(BTreeMap::len).sum()
    }

    pub fn passed_count(&self) -> usize {
        self.iter().filter(|(_, _, v)| v.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.cell_count() - self.passed_count()
    }

    pub fn all_passed(&self) -> bool {
        self.iter().all(|(_, _, v)| v.passed())
    }

    /// Failed cells, in key order.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str, &RunVerdict)> {
        self.iter().filter(|(_, _, v)| !v.passed())
    }
}

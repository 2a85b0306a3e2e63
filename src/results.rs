use crate::error::KwResult;
use crate::worker::WorkerChannel;
use keyweave_protocol::evaluation::EvaluationResult;
use keyweave_protocol::fingerprint::ConfigFingerprint;
use keyweave_protocol::layout::LayoutString;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    Added(EvaluationResult),
    AlreadyPresent,
}

/// The evaluated layouts shown to the user, in insertion order and unique by layout.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    entries: Vec<EvaluationResult>,
    fingerprint: Option<ConfigFingerprint>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates `layout` and appends it. Known layouts are not re-evaluated.
    pub async fn add(&mut self, channel: &WorkerChannel, layout: &LayoutString) -> KwResult<AddOutcome> {
        if self.contains(layout) {
            return Ok(AddOutcome::AlreadyPresent);
        }
        let result = channel.evaluate(layout).await?;
        self.entries.push(result.clone());
        Ok(AddOutcome::Added(result))
    }

    /// Replaces the entry with the same layout, or appends.
    pub fn upsert(&mut self, result: EvaluationResult) {
        match self.entries.iter_mut().find(|e| e.layout == result.layout) {
            Some(existing) => *existing = result,
            None => self.entries.push(result),
        }
    }

    pub fn remove(&mut self, layout: &LayoutString) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.layout != layout);
        self.entries.len() != before
    }

    /// Re-evaluates every entry in order. On any failure the previous contents stay.
    pub async fn reevaluate_all(&mut self, channel: &WorkerChannel) -> KwResult<()> {
        let mut fresh = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            fresh.push(channel.evaluate(&entry.layout).await?);
        }
        info!("🔁 Re-evaluated {} layouts", fresh.len());
        self.entries = fresh;
        Ok(())
    }

    pub fn stamp(&mut self, fingerprint: ConfigFingerprint) {
        debug!("Result set now reflects config {}", fingerprint.short());
        self.fingerprint = Some(fingerprint);
    }

    pub fn fingerprint(&self) -> Option<&ConfigFingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn contains(&self, layout: &LayoutString) -> bool {
        self.entries.iter().any(|e| &e.layout == layout)
    }

    pub fn get(&self, layout: &LayoutString) -> Option<&EvaluationResult> {
        self.entries.iter().find(|e| &e.layout == layout)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EvaluationResult> {
        self.entries.iter()
    }

    pub fn layouts(&self) -> Vec<LayoutString> {
        self.entries.iter().map(|e| e.layout.clone()).collect()
    }

    pub fn best(&self) -> Option<&EvaluationResult> {
        self.entries
            .iter()
            .min_by(|a, b| a.total_cost.total_cmp(&b.total_cost))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a EvaluationResult;
    type IntoIter = std::slice::Iter<'a, EvaluationResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

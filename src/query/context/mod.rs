
use crate::corpus::CorpusKind;
use crate::database::ScoredRecord;

/// Renders retrieved evidence as the cited passage block of a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextFormatter {
    kind: CorpusKind,
}

impl ContextFormatter {
    #[inline]
    pub fn new(kind: CorpusKind) -> Self {
        Self { kind }
    }

    /// Reference for a hit; the record id when its metadata lacks the fields
    #[inline]
    pub fn citation(&self, record: &ScoredRecord) -> String {
        self.kind
            .citation(&record.metadata)
            .unwrap_or_else(|| record.id.clone())
    }

    /// Every reference, in retrieval order
    #[inline]
    pub fn citations(&self, results: &[ScoredRecord]) -> Vec<String> {
        results.iter().map(|record| self.citation(record)).collect()
    }

    /// One `- <citation> — <text>` line per hit, in retrieval order
    #[inline]
    pub fn format(&self, results: &[ScoredRecord]) -> String {
        results
            .iter()
            .map(|record| {
                let text = record.document.split_whitespace().collect::<Vec<_>>().join(" ");
                format!("- {} — {}", self.citation(record), text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

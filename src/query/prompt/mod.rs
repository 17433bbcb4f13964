
use crate::corpus::CorpusKind;

/// Marks the start of the citation list in a generated answer
pub const CITATIONS_HEADER: &str = "Citations:";

/// Assembles the grounded instruction sent to the generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBuilder {
    kind: CorpusKind,
    fallback_phrase: String,
}

impl PromptBuilder {
    #[inline]
    pub fn new(kind: CorpusKind, fallback_phrase: impl Into<String>) -> Self {
        Self {
            kind,
            fallback_phrase: fallback_phrase.into(),
        }
    }

    #[inline]
    pub fn fallback_phrase(&self) -> &str {
        &self.fallback_phrase
    }

    #[inline]
    pub fn build(&self, context: &str, question: &str) -> String {
        format!(
            "{persona}\n\
             Use ONLY the provided passages to answer. If the answer is not present in them, \
             reply exactly with: {fallback}\n\
             Always cite the passages you use ({hint}).\n\
             \n\
             Passages:\n\
             {context}\n\
             \n\
             Question: {question}\n\
             \n\
             Return:\n\
             - A 2-5 sentence answer.\n\
             - Then a line reading \"{header}\" followed by one bullet per citation, \
             copied exactly from the passage references above.\n",
            persona = self.kind.persona(),
            fallback = self.fallback_phrase,
            hint = self.kind.citation_hint(),
            context = context,
            question = question.trim(),
            header = CITATIONS_HEADER,
        )
    }
}

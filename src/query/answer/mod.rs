
use serde::Serialize;
use tracing::warn;

use super::prompt::CITATIONS_HEADER;

/// A generated answer and the references that back it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub text: String,
    /// Only references of records that were retrieved for this question
    pub citations: Vec<String>,
}

impl Answer {
    /// The answer given when the passages cannot support one
    #[inline]
    pub fn fallback(phrase: &str) -> Self {
        Self {
            text: phrase.to_string(),
            citations: Vec::new(),
        }
    }

    /// Split generated text into answer and citations.
    ///
    /// Citations that are not among `evidence` are dropped. An answer that falls back
    /// carries no citations.
    #[inline]
    pub fn parse(raw: &str, evidence: &[String], fallback_phrase: &str) -> Self {
        let lines: Vec<&str> = raw.lines().collect();

        let (body, claimed) = match lines.iter().position(|line| is_citations_header(line)) {
            Some(header) => {
                let inline = header_remainder(lines[header]);
                let mut claimed: Vec<String> = inline
                    .split([',', ';'])
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect();
                claimed.extend(lines[header + 1..].iter().filter_map(|line| bullet(line)));
                (&lines[..header], claimed)
            }
            None => {
                // Without a header, only a trailing bullet list counts as citations
                let start = lines
                    .iter()
                    .rposition(|line| !line.trim().is_empty() && bullet(line).is_none())
                    .map_or(0, |last_prose| last_prose + 1);
                let claimed = lines[start..].iter().filter_map(|line| bullet(line)).collect();
                (&lines[..start], claimed)
            }
        };

        let text = body.join("\n").trim().to_string();

        if mentions(&text, fallback_phrase) || (text.is_empty() && claimed.is_empty()) {
            return Self::fallback(fallback_phrase);
        }

        let mut citations: Vec<String> = Vec::new();
        for claim in claimed {
            match evidence
                .iter()
                .find(|reference| reference.eq_ignore_ascii_case(&claim))
            {
                Some(reference) if !citations.contains(reference) => {
                    citations.push(reference.clone());
                }
                Some(_) => {}
                None => warn!("Dropping citation not found in retrieved passages: {}", claim),
            }
        }

        Self { text, citations }
    }

    #[inline]
    pub fn is_fallback(&self, fallback_phrase: &str) -> bool {
        mentions(&self.text, fallback_phrase)
    }
}

fn is_citations_header(line: &str) -> bool {
    let trimmed = line.trim().trim_start_matches(['*', '#', ' ']);
    trimmed
        .get(..CITATIONS_HEADER.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(CITATIONS_HEADER))
}

fn header_remainder(line: &str) -> &str {
    line.split_once(':')
        .map_or("", |(_, rest)| rest.trim().trim_matches('*'))
}

/// The item of a `-`, `*` or `•` bullet line
fn bullet(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let item = trimmed
        .strip_prefix('-')
        .or_else(|| trimmed.strip_prefix('*'))
        .or_else(|| trimmed.strip_prefix('•'))?
        .trim()
        .trim_matches(|c: char| c == '(' || c == ')' || c == '.' || c == '*')
        .trim();

    (!item.is_empty()).then(|| item.to_string())
}

fn mentions(text: &str, phrase: &str) -> bool {
    let phrase = phrase.trim();
    !phrase.is_empty() && text.to_lowercase().contains(&phrase.to_lowercase())
}

// Corpus module
// Loads verse and catechism CSV exports into typed records


use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{RagError, Result};

/// Namespace for record ids, so ids never collide with other UUIDv5 users
const RECORD_ID_NAMESPACE: Uuid = Uuid::from_u128(0x5c1e_7a9d_4b2f_4e61_9d3a_8f0b_2c47_e815);

/// Which corpus a collection holds. Decides row schema, citation format and persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CorpusKind {
    /// Douay-Rheims verses: `Book,Chapter,Verse,Text`
    Bible,
    /// Compendium Q&A: `QuestionNumber,Question,Answer,ParagraphRefs,Section,Chapter`
    Catechism,
}

impl CorpusKind {
    /// Human-readable reference for a stored record, e.g. `John 13:34` or `Q112`
    #[inline]
    pub fn citation(self, metadata: &BTreeMap<String, String>) -> Option<String> {
        match self {
            Self::Bible => {
                let book = metadata.get("book")?;
                let chapter = metadata.get("chapter")?;
                let verse = metadata.get("verse")?;
                Some(format!("{book} {chapter}:{verse}"))
            }
            Self::Catechism => metadata
                .get("question_num")
                .map(|number| format!("Q{number}")),
        }
    }

    /// Role statement placed at the top of every prompt
    #[inline]
    pub fn persona(self) -> &'static str {
        match self {
            Self::Bible => "You are a Catholic Bible tutor using the Douay-Rheims Bible.",
            Self::Catechism => {
                "You are a Catholic catechism tutor using the Compendium of the Catechism of the Catholic Church."
            }
        }
    }

    /// Shape of a citation, as shown to the model
    #[inline]
    pub fn citation_hint(self) -> &'static str {
        match self {
            Self::Bible => "Book Chapter:Verse",
            Self::Catechism => "Q<number>",
        }
    }

    #[inline]
    pub fn unit_name(self) -> &'static str {
        match self {
            Self::Bible => "verses",
            Self::Catechism => "Q&A entries",
        }
    }
}

impl fmt::Display for CorpusKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bible => write!(f, "bible"),
            Self::Catechism => write!(f, "catechism"),
        }
    }
}

/// One corpus row, ready to embed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Ordered key parts, e.g. `["John", "13", "34"]` or `["112"]`
    pub natural_key: Vec<String>,
    /// Text that gets embedded and stored as the document
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl Record {
    #[inline]
    pub fn new(
        natural_key: Vec<String>,
        text: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            natural_key,
            text: text.into(),
            metadata,
        }
    }

    /// Stable id; the same natural key always yields the same id
    #[inline]
    pub fn stored_id(&self) -> String {
        stored_record_id(&self.natural_key)
    }

    #[inline]
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Readable key parts plus a short UUIDv5 suffix over the exact parts.
///
/// The suffix keeps keys distinct when the readable form collides, e.g.
/// `["1-John", "1"]` and `["1", "John-1"]`.
#[inline]
pub fn stored_record_id(natural_key: &[String]) -> String {
    let readable = natural_key
        .iter()
        .map(|part| part.trim().replace(char::is_whitespace, "_"))
        .collect::<Vec<_>>()
        .join("-");

    let exact = natural_key.join("\u{1f}");
    let digest = Uuid::new_v5(&RECORD_ID_NAMESPACE, exact.as_bytes());

    format!("{}-{:08x}", readable, digest.as_u128() >> 96)
}

/// A row that could not become a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRejection {
    /// 1-based line in the CSV file
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadedCorpus {
    pub records: Vec<Record>,
    pub rejected: Vec<RowRejection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VerseRow {
    book: String,
    chapter: String,
    verse: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatechismRow {
    question_number: String,
    #[serde(default)]
    question: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    paragraph_refs: String,
    #[serde(default)]
    section: String,
    #[serde(default)]
    chapter: String,
}

impl TryFrom<VerseRow> for Record {
    type Error = String;

    fn try_from(row: VerseRow) -> std::result::Result<Self, Self::Error> {
        let book = required(&row.book, "Book")?;
        let chapter = required(&row.chapter, "Chapter")?;
        let verse = required(&row.verse, "Verse")?;
        let text = row.text.as_deref().unwrap_or_default().trim().to_string();

        let metadata = BTreeMap::from([
            ("book".to_string(), book.clone()),
            ("chapter".to_string(), chapter.clone()),
            ("verse".to_string(), verse.clone()),
        ]);

        Ok(Self::new(vec![book, chapter, verse], text, metadata))
    }
}

impl TryFrom<CatechismRow> for Record {
    type Error = String;

    fn try_from(row: CatechismRow) -> std::result::Result<Self, Self::Error> {
        let number = required(&row.question_number, "QuestionNumber")?;
        let question = row.question.trim();
        let answer = row.answer.trim();

        let text = if question.is_empty() && answer.is_empty() {
            String::new()
        } else {
            format!("Q: {question}\nA: {answer}")
        };

        let metadata = BTreeMap::from([
            ("question_num".to_string(), number.clone()),
            (
                "paragraph_refs".to_string(),
                row.paragraph_refs.trim().to_string(),
            ),
            ("section".to_string(), row.section.trim().to_string()),
            ("chapter".to_string(), row.chapter.trim().to_string()),
        ]);

        Ok(Self::new(vec![number], text, metadata))
    }
}

fn required(value: &str, column: &str) -> std::result::Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        Err(format!("missing required field '{column}'"))
    } else {
        Ok(value.to_string())
    }
}

/// Load a corpus CSV from disk
#[inline]
pub fn load_csv(kind: CorpusKind, path: &Path) -> Result<LoadedCorpus> {
    info!("Loading {} corpus from {}", kind, path.display());

    let file = std::fs::File::open(path).map_err(|e| {
        RagError::Corpus(format!("Failed to open {}: {}", path.display(), e))
    })?;

    let loaded = read_records(kind, io::BufReader::new(file))?;

    info!(
        "Loaded {} {} ({} rows rejected) from {}",
        loaded.records.len(),
        kind.unit_name(),
        loaded.rejected.len(),
        path.display()
    );

    Ok(loaded)
}

/// Parse corpus rows from any reader. Malformed rows are rejected, not fatal.
#[inline]
pub fn read_records<R: io::Read>(kind: CorpusKind, reader: R) -> Result<LoadedCorpus> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| RagError::Corpus(format!("Failed to read CSV header: {}", e)))?
        .clone();

    let mut loaded = LoadedCorpus::default();
    let mut raw = csv::StringRecord::new();

    loop {
        match csv_reader.read_record(&mut raw) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if e.is_io_error() => {
                return Err(RagError::Corpus(format!("Failed to read CSV: {}", e)));
            }
            Err(e) => {
                let line = e.position().map_or(0, csv::Position::line);
                warn!("Rejecting CSV line {}: {}", line, e);
                loaded.rejected.push(RowRejection {
                    line,
                    reason: e.to_string(),
                });
                continue;
            }
        }

        let line = raw.position().map_or(0, csv::Position::line);

        let record = match kind {
            CorpusKind::Bible => raw
                .deserialize::<VerseRow>(Some(&headers))
                .map_err(|e| e.to_string())
                .and_then(Record::try_from),
            CorpusKind::Catechism => raw
                .deserialize::<CatechismRow>(Some(&headers))
                .map_err(|e| e.to_string())
                .and_then(Record::try_from),
        };

        match record {
            Ok(record) => loaded.records.push(record),
            Err(reason) => {
                debug!("Rejecting CSV line {}: {}", line, reason);
                loaded.rejected.push(RowRejection { line, reason });
            }
        }
    }

    Ok(loaded)
}

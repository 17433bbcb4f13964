// Deterministic stand-ins for the Ollama services
#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use scripture_rag::embeddings::{EmbeddingError, EmbeddingService};
use scripture_rag::generation::{GenerationError, GenerationService};
use std::sync::Mutex;

pub const DIMENSION: usize = 384;

/// Hashes each word into a bucket, so shared vocabulary means small cosine distance
#[derive(Debug, Default)]
pub struct KeywordEmbedder;

#[async_trait]
impl EmbeddingService for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("input is empty".to_string()));
        }
        Ok(keyword_vector(text))
    }

    fn model(&self) -> &str {
        "keyword-hash"
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIMENSION];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
    {
        let hash = word
            .to_lowercase()
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
                (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
            });
        let bucket = usize::try_from(hash % DIMENSION as u64).expect("bucket fits usize");
        vector[bucket] += 1.0;
    }
    vector
}

/// Answers with a fixed reply and keeps the prompts it was given
#[derive(Debug)]
pub struct ScriptedGenerator {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts
            .lock()
            .expect("lock poisoned")
            .push(prompt.to_string());
        Ok(self.reply.clone())
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

use crate::error::{KeyWeaveError, KwResult};
use async_trait::async_trait;
use keyweave_protocol::config::NgramSource;
use keyweave_protocol::message::{NgramInput, NgramTables};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Supplies the prepared frequency tables of a corpus.
#[async_trait]
pub trait CorpusStore: Send + Sync {
    async fn fetch(&self, corpus_key: &str) -> KwResult<NgramTables>;
}

/// Reads `<root>/<corpus_key>/{1,2,3}-grams.txt`.
pub struct FsCorpusStore {
    root: PathBuf,
}

impl FsCorpusStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl CorpusStore for FsCorpusStore {
    async fn fetch(&self, corpus_key: &str) -> KwResult<NgramTables> {
        if corpus_key.is_empty()
            || corpus_key.contains(['/', '\\'])
            || corpus_key.starts_with('.')
        {
            return Err(KeyWeaveError::Corpus(format!(
                "Invalid corpus key '{}'",
                corpus_key
            )));
        }

        let dir = self.root.join(corpus_key);
        debug!("Loading ngram tables from {:?}", dir);

        let (unigrams, bigrams, trigrams) = tokio::try_join!(
            read_table(&dir, "1-grams.txt"),
            read_table(&dir, "2-grams.txt"),
            read_table(&dir, "3-grams.txt"),
        )?;

        Ok(NgramTables {
            unigrams,
            bigrams,
            trigrams,
        })
    }
}

async fn read_table(dir: &Path, file: &str) -> KwResult<String> {
    let path = dir.join(file);
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| KeyWeaveError::Corpus(format!("Failed to read {:?}: {}", path, e)))
}

/// In-memory corpus store, handy for hosts that bundle their corpora.
#[derive(Default)]
pub struct MemoryCorpusStore {
    corpora: HashMap<String, NgramTables>,
}

impl MemoryCorpusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, corpus_key: impl Into<String>, tables: NgramTables) -> Self {
        self.corpora.insert(corpus_key.into(), tables);
        self
    }
}

#[async_trait]
impl CorpusStore for MemoryCorpusStore {
    async fn fetch(&self, corpus_key: &str) -> KwResult<NgramTables> {
        self.corpora
            .get(corpus_key)
            .cloned()
            .ok_or_else(|| KeyWeaveError::Corpus(format!("Unknown corpus '{}'", corpus_key)))
    }
}

/// Turns a configured source into what the worker consumes.
pub async fn resolve_source(store: &dyn CorpusStore, source: &NgramSource) -> KwResult<NgramInput> {
    match source {
        NgramSource::Prepared { corpus_key } => {
            Ok(NgramInput::Frequencies(store.fetch(corpus_key).await?))
        }
        NgramSource::Text { corpus_text } => Ok(NgramInput::Text {
            corpus_text: corpus_text.clone(),
        }),
    }
}

use crate::config::{ConfigError, CorpusFormat, CorpusSource};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while materializing a corpus from disk.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// Reading the backing file failed.
    #[error("Corpus I/O error: {0}")]
    Io(String),

    /// The backing file was read but did not hold a list of strings.
    #[error("Corpus deserialization error: {0}")]
    Deserialization(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A named, ordered sequence of fuzz inputs.
///
/// Items are shared behind an `Arc` so handing a corpus to a runner never copies
/// the inputs, and nothing can mutate them once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corpus {
    name: String,
    items: Arc<[String]>,
}

impl Corpus {
    pub fn new(name: impl Into<String>, items: Vec<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyCorpusName);
        }
        Ok(Self {
            name,
            items: items.into(),
        })
    }

    /// Loads a JSON document consisting of one list of strings, such as the
    /// Big List of Naughty Strings.
    pub fn from_json_list(name: impl Into<String>, path: &Path) -> Result<Self, CorpusError> {
        let content = fs::read_to_string(path).map_err(|e| {
            CorpusError::Io(format!("Failed to read corpus file {:?}: {}", path, e))
        })?;
        let items: Vec<String> = serde_json::from_str(&content).map_err(|e| {
            CorpusError::Deserialization(format!(
                "Corpus file {:?} is not a JSON list of strings: {}",
                path, e
            ))
        })?;
        Ok(Self::new(name, items)?)
    }

    /// Loads a plain text file, one input per line. Trailing `\n` and `\r\n`
    /// terminators are stripped; everything else on the line is kept verbatim.
    pub fn from_lines(name: impl Into<String>, path: &Path) -> Result<Self, CorpusError> {
        let content = fs::read_to_string(path).map_err(|e| {
            CorpusError::Io(format!("Failed to read corpus file {:?}: {}", path, e))
        })?;
        let items = content.lines().map(str::to_owned).collect();
        Ok(Self::new(name, items)?)
    }

    pub fn from_source(source: &CorpusSource) -> Result<Self, CorpusError> {
        match source.format {
            CorpusFormat::JsonList => Self::from_json_list(source.name.clone(), &source.path),
            CorpusFormat::Lines => Self::from_lines(source.name.clone(), &source.path),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Holds every corpus the orchestrator will fuzz with, in registration order.
#[derive(Debug, Default, Clone)]
pub struct CorpusRegistry {
    entries: Vec<Corpus>,
    index_by_name: HashMap<String, usize>,
}

impl CorpusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `items` under `name`.
    ///
    /// Registering a name that already exists replaces its content but keeps the
    /// slot it was first registered in, so report ordering stays stable.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        items: Vec<String>,
    ) -> Result<&Corpus, ConfigError> {
        let corpus = Corpus::new(name, items)?;
        Ok(self.insert(corpus))
    }

    pub fn insert(&mut self, corpus: Corpus) -> &Corpus {
        let slot = match self.index_by_name.get(corpus.name()) {
            Some(&existing) => {
                tracing::debug!(corpus = corpus.name(), "replacing registered corpus");
                self.entries[existing] = corpus;
                existing
            }
            None => {
                let slot = self.entries.len();
                self.index_by_name.insert(corpus.name().to_owned(), slot);
                self.entries.push(corpus);
                slot
            }
        };
        let stored = &self.entries[slot];
        tracing::debug!(
            corpus = stored.name(),
            inputs = stored.len(),
            "registered corpus"
        );
        stored
    }

    /// Loads and registers every configured source, stopping at the first one
    /// that cannot be read.
    pub fn load_sources(&mut self, sources: &[CorpusSource]) -> Result<usize, CorpusError> {
        for source in sources {
            self.insert(Corpus::from_source(source)?);
        }
        Ok(sources.len())
    }

    pub fn all(&self) -> impl Iterator<Item = &Corpus> {
        self.entries.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Corpus> {
        self.index_by_name.get(name).map(|&slot| &self.entries[slot])
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(Corpus::name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

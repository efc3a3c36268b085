//! Document accumulation and TF-IDF vector index.
//!
//! [`ContentIndexer`] owns the buffer of every document scraped during its
//! lifetime and the [`DocumentIndex`] derived from it. Each ingest appends the
//! new batch and rebuilds the index over the whole buffer, so document ids are
//! buffer positions and the index always reflects exactly the appended
//! documents (or, after a failed rebuild, the previous successful state).
//!
//! Mutation goes through `&mut self`; callers that share an indexer across
//! tasks wrap it in a mutex.

use crate::models::ScrapedDocument;
use crate::utils::preview;
use itertools::Itertools;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::ops::Range;
use tracing::{debug, error, info, instrument, warn};

pub type TermId = u32;
pub type DocId = u32;

/// Largest vocabulary the id space can hold.
pub const MAX_TERMS: usize = TermId::MAX as usize;

/// Returned in place of a summary when a batch adds nothing.
pub const NO_CONTENT: &str = "no content scraped";

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "his", "in", "is", "it", "its", "of", "on", "or", "our", "she", "that", "the", "their",
    "they", "this", "to", "was", "we", "were", "will", "with", "you", "your",
];

/// Lower-cased alphanumeric tokens of at least two characters, minus stopwords.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    TooManyDocuments(usize),
    TooManyTerms(usize),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyDocuments(n) => write!(f, "{n} documents exceed the index id space"),
            Self::TooManyTerms(n) => write!(f, "vocabulary exceeds the limit of {n} terms"),
        }
    }
}

impl Error for IndexError {}

/// A search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub source_url: String,
    /// Cosine similarity in `(0, 1]`.
    pub score: f32,
}

/// L2-normalised TF-IDF vectors over a fixed document set.
#[derive(Debug, Clone, Default)]
pub struct DocumentIndex {
    dictionary: HashMap<String, TermId>,
    terms: Vec<String>,
    idf: Vec<f32>,
    /// Per document, `(term, weight)` sorted by term id.
    vectors: Vec<Vec<(TermId, f32)>>,
    sources: Vec<String>,
}

impl DocumentIndex {
    /// Build an index over `docs`; document `i` gets id `i`.
    ///
    /// # Errors
    ///
    /// [`IndexError::TooManyTerms`] once the vocabulary would grow past
    /// `max_terms` (itself capped at [`MAX_TERMS`]), and
    /// [`IndexError::TooManyDocuments`] if document ids would overflow.
    pub fn build(docs: &[ScrapedDocument], max_terms: usize) -> Result<Self, IndexError> {
        DocId::try_from(docs.len()).map_err(|_| IndexError::TooManyDocuments(docs.len()))?;
        let max_terms = max_terms.min(MAX_TERMS);

        let mut dictionary: HashMap<String, TermId> = HashMap::new();
        let mut terms: Vec<String> = Vec::new();
        let mut df: Vec<u32> = Vec::new();
        let mut counts: Vec<HashMap<TermId, u32>> = Vec::with_capacity(docs.len());

        for doc in docs {
            let mut tf: HashMap<TermId, u32> = HashMap::new();
            for token in tokenize(&doc.text) {
                let id = match dictionary.get(&token) {
                    Some(&id) => id,
                    None => {
                        if terms.len() >= max_terms {
                            return Err(IndexError::TooManyTerms(max_terms));
                        }
                        let id = TermId::try_from(terms.len())
                            .map_err(|_| IndexError::TooManyTerms(max_terms))?;
                        dictionary.insert(token.clone(), id);
                        terms.push(token);
                        df.push(0);
                        id
                    }
                };
                *tf.entry(id).or_insert(0) += 1;
            }
            for id in tf.keys() {
                df[*id as usize] += 1;
            }
            counts.push(tf);
        }

        let n = docs.len() as f32;
        let idf: Vec<f32> = df
            .iter()
            .map(|&d| ((1.0 + n) / (1.0 + d as f32)).ln() + 1.0)
            .collect();

        let vectors = counts
            .into_iter()
            .map(|tf| {
                let weighted = tf
                    .into_iter()
                    .map(|(id, c)| (id, (1.0 + (c as f32).ln()) * idf[id as usize]))
                    .sorted_by_key(|(id, _)| *id)
                    .collect::<Vec<_>>();
                normalize(weighted)
            })
            .collect();

        Ok(Self {
            dictionary,
            terms,
            idf,
            vectors,
            sources: docs.iter().map(|d| d.source_url.clone()).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Top `k` documents by cosine similarity to `query`; zero scores are dropped.
    pub fn search(&self, query: &str, k: usize) -> Vec<SearchHit> {
        let mut tf: HashMap<TermId, u32> = HashMap::new();
        for token in tokenize(query) {
            if let Some(&id) = self.dictionary.get(&token) {
                *tf.entry(id).or_insert(0) += 1;
            }
        }
        if tf.is_empty() {
            return Vec::new();
        }
        let query_vec: HashMap<TermId, f32> = normalize(
            tf.into_iter()
                .map(|(id, c)| (id, (1.0 + (c as f32).ln()) * self.idf[id as usize]))
                .collect(),
        )
        .into_iter()
        .collect();

        self.vectors
            .iter()
            .enumerate()
            .filter_map(|(i, vector)| {
                let score: f32 = vector
                    .iter()
                    .filter_map(|(id, w)| query_vec.get(id).map(|q| q * w))
                    .sum();
                (score > 0.0).then(|| SearchHit {
                    doc_id: i as DocId,
                    source_url: self.sources[i].clone(),
                    score,
                })
            })
            .sorted_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(Ordering::Equal)
                    .then(a.doc_id.cmp(&b.doc_id))
            })
            .take(k)
            .collect()
    }

    /// The `k` highest-weighted terms of one document.
    pub fn top_terms(&self, doc_id: DocId, k: usize) -> Vec<String> {
        let Some(vector) = self.vectors.get(doc_id as usize) else {
            return Vec::new();
        };
        vector
            .iter()
            .sorted_by(|(ia, wa), (ib, wb)| {
                wb.partial_cmp(wa)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| self.terms[*ia as usize].cmp(&self.terms[*ib as usize]))
            })
            .take(k)
            .map(|(id, _)| self.terms[*id as usize].clone())
            .collect()
    }
}

fn normalize(mut vector: Vec<(TermId, f32)>) -> Vec<(TermId, f32)> {
    let norm = vector.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
    if norm > 0.0 {
        for (_, w) in vector.iter_mut() {
            *w /= norm;
        }
    }
    vector
}

/// Result of one [`ContentIndexer::ingest`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The batch was appended and the index rebuilt.
    Indexed {
        summary: String,
        /// Buffer positions (and doc ids) of the documents this batch added.
        added: Range<usize>,
    },
    /// Nothing in the batch had text; the buffer is unchanged.
    Empty,
    /// The batch was appended but the rebuild failed; the previous index is kept.
    Failed { reason: String },
}

impl fmt::Display for IngestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indexed { summary, .. } => f.write_str(summary),
            Self::Empty => f.write_str(NO_CONTENT),
            Self::Failed { reason } => write!(f, "Error during scraping: {reason}"),
        }
    }
}

/// Owns the accumulation buffer and the index derived from it.
#[derive(Debug)]
pub struct ContentIndexer {
    documents: Vec<ScrapedDocument>,
    index: Option<DocumentIndex>,
    summary_chars: usize,
    max_terms: usize,
}

impl Default for ContentIndexer {
    fn default() -> Self {
        Self::new(200)
    }
}

impl ContentIndexer {
    /// `summary_chars` caps each document's contribution to the batch summary.
    pub fn new(summary_chars: usize) -> Self {
        Self {
            documents: Vec::new(),
            index: None,
            summary_chars,
            max_terms: MAX_TERMS,
        }
    }

    /// Cap the vocabulary; a rebuild that would exceed it fails.
    pub fn with_max_terms(mut self, max_terms: usize) -> Self {
        self.max_terms = max_terms;
        self
    }

    pub fn documents(&self) -> &[ScrapedDocument] {
        &self.documents
    }

    /// The index from the last successful rebuild.
    pub fn index(&self) -> Option<&DocumentIndex> {
        self.index.as_ref()
    }

    /// Append `new_docs`, rebuild the index over the whole buffer, and summarise the batch.
    #[instrument(level = "info", skip_all, fields(batch = new_docs.len(), buffered = self.documents.len()))]
    pub fn ingest(&mut self, new_docs: Vec<ScrapedDocument>) -> IngestOutcome {
        let (usable, blank): (Vec<_>, Vec<_>) =
            new_docs.into_iter().partition(|d| !d.text.trim().is_empty());
        for doc in &blank {
            warn!(url = %doc.source_url, "Dropping document without text");
        }
        if usable.is_empty() {
            info!("No new content to index");
            return IngestOutcome::Empty;
        }

        let summary = usable
            .iter()
            .map(|d| preview(&d.text, self.summary_chars))
            .join(" ");

        let start = self.documents.len();
        self.documents.extend(usable);
        let added = start..self.documents.len();

        match DocumentIndex::build(&self.documents, self.max_terms) {
            Ok(index) => {
                info!(
                    added = added.len(),
                    documents = index.len(),
                    terms = index.term_count(),
                    "Rebuilt document index"
                );
                debug!(summary_bytes = summary.len(), "Batch summary ready");
                self.index = Some(index);
                IngestOutcome::Indexed { summary, added }
            }
            Err(e) => {
                error!(error = %e, "Index rebuild failed");
                IngestOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

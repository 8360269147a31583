use anyhow::Context;
use fastembed::{ EmbeddingModel, InitOptions, TextEmbedding };
use serde::{ Deserialize, Serialize };
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{ debug, info };

// ─────────────────────────────────────────────────────────────────────
//  Public types
// ─────────────────────────────────────────────────────────────────────

/// Result of scoring one text against a candidate label set.
///
/// `labels` is sorted by descending score, `scores` is aligned with it
/// and sums to 1.  `label` is always `labels[0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub labels: Vec<String>,
    pub scores: Vec<f32>,
}

/// Zero-shot scorer: maps text + arbitrary labels to a best label.
pub trait LabelScorer: Send + Sync {
    fn classify(&self, text: &str, labels: &[String]) -> anyhow::Result<Classification>;
}

/// Embedding models the service can be started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EmbeddingChoice {
    #[value(name = "all-MiniLM-L6-v2")]
    AllMiniLmL6V2,
    #[value(name = "bge-small-en-v1.5")]
    BgeSmallEnV15,
    #[value(name = "multilingual-e5-small")]
    MultilingualE5Small,
}

impl EmbeddingChoice {
    fn model(self) -> EmbeddingModel {
        match self {
            EmbeddingChoice::AllMiniLmL6V2 => EmbeddingModel::AllMiniLML6V2,
            EmbeddingChoice::BgeSmallEnV15 => EmbeddingModel::BGESmallENV15,
            EmbeddingChoice::MultilingualE5Small => EmbeddingModel::MultilingualE5Small,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
//  Embedding backend
// ─────────────────────────────────────────────────────────────────────

/// Batch text → vector embedding.
pub trait Embedder: Send {
    fn embed_batch(&mut self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>>;
}

impl Embedder for TextEmbedding {
    fn embed_batch(&mut self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
        self.embed(texts, None).map_err(|e| anyhow::anyhow!("embedding failed: {}", e))
    }
}

/// Load the embedding model, reusing `model_dir` as the on-disk cache.
///
/// First start downloads the ONNX weights + tokenizer into `model_dir`;
/// later starts load them from there without network access.
pub fn load_embedding_model(model_dir: &Path, choice: EmbeddingChoice) -> anyhow::Result<TextEmbedding> {
    let abs = std::path::absolute(model_dir).unwrap_or_else(|_| model_dir.to_path_buf());
    if model_dir.is_dir() {
        info!(dir = %abs.display(), model = ?choice, "📦 loading model from local folder");
    } else {
        info!(dir = %abs.display(), model = ?choice, "⬇️  downloading model (first start)");
    }

    let options = InitOptions::new(choice.model())
        .with_cache_dir(model_dir.to_path_buf());
    let model = TextEmbedding::try_new(options).with_context(||
        format!("loading embedding model into {}", abs.display())
    )?;

    info!("✅ model ready");
    Ok(model)
}

// ─────────────────────────────────────────────────────────────────────
//  Zero-shot classifier
// ─────────────────────────────────────────────────────────────────────

/// Hypothesis embeddings kept between requests before the cache is reset.
pub const HYPOTHESIS_CACHE_CAP: usize = 512;

/// Entailment-style zero-shot classifier.
///
/// Every candidate label is turned into a hypothesis sentence
/// ("This example is {label}."), the text and hypotheses are embedded,
/// and the cosine similarities are softmaxed into a distribution.
/// Hypothesis embeddings are cached across requests, up to
/// [`HYPOTHESIS_CACHE_CAP`] entries.
pub struct ZeroShotClassifier<E: Embedder = TextEmbedding> {
    embedder: Mutex<E>,
    template: String,
    temperature: f32,
    hypothesis_cache: Mutex<HashMap<String, Vec<f32>>>,
}

impl<E: Embedder> ZeroShotClassifier<E> {
    pub fn new(embedder: E, template: impl Into<String>, temperature: f32) -> anyhow::Result<Self> {
        let template = template.into();
        if !template.contains("{}") {
            anyhow::bail!("hypothesis template {template:?} has no {{}} placeholder");
        }
        if temperature.is_nan() || temperature <= 0.0 {
            anyhow::bail!("temperature must be positive, got {temperature}");
        }
        Ok(ZeroShotClassifier {
            embedder: Mutex::new(embedder),
            template,
            temperature,
            hypothesis_cache: Mutex::new(HashMap::new()),
        })
    }

    fn hypothesis(&self, label: &str) -> String {
        self.template.replace("{}", label)
    }
}

impl<E: Embedder> LabelScorer for ZeroShotClassifier<E> {
    fn classify(&self, text: &str, labels: &[String]) -> anyhow::Result<Classification> {
        let labels = dedup_labels(labels);
        if labels.is_empty() {
            anyhow::bail!("no candidate labels");
        }

        let hypotheses: Vec<String> = labels
            .iter()
            .map(|l| self.hypothesis(l))
            .collect();

        // Copy cached vectors out; the cache may be cleared meanwhile.
        let mut known: HashMap<String, Vec<f32>> = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        {
            let cache = self.hypothesis_cache.lock().map_err(|_| anyhow::anyhow!("cache poisoned"))?;
            for h in &hypotheses {
                match cache.get(h) {
                    Some(v) => {
                        known.insert(h.clone(), v.clone());
                    }
                    None => missing.push(h.clone()),
                }
            }
        }

        // Embed the text plus any hypothesis we haven't seen yet in one batch.
        let mut batch = Vec::with_capacity(missing.len() + 1);
        batch.push(text.to_string());
        batch.extend(missing.iter().cloned());

        let mut vectors = {
            let mut embedder = self.embedder
                .lock()
                .map_err(|_| anyhow::anyhow!("embedder poisoned"))?;
            embedder.embed_batch(batch)?
        };
        if vectors.len() != missing.len() + 1 {
            anyhow::bail!("embedder returned {} vectors for {} inputs", vectors.len(), missing.len() + 1);
        }
        let text_vec = vectors.remove(0);
        let fresh: Vec<(String, Vec<f32>)> = missing.into_iter().zip(vectors).collect();

        {
            let mut cache = self.hypothesis_cache.lock().map_err(|_| anyhow::anyhow!("cache poisoned"))?;
            if cache.len() + fresh.len() > HYPOTHESIS_CACHE_CAP {
                debug!(entries = cache.len(), "hypothesis cache full, clearing");
                cache.clear();
            }
            if fresh.len() <= HYPOTHESIS_CACHE_CAP {
                cache.extend(fresh.iter().cloned());
            }
        }
        known.extend(fresh);

        let sims: Vec<f32> = hypotheses
            .iter()
            .map(|h| {
                known
                    .get(h)
                    .map(|v| cosine_similarity(&text_vec, v))
                    .with_context(|| format!("no embedding for hypothesis {h:?}"))
            })
            .collect::<anyhow::Result<_>>()?;

        let probs = softmax(&sims, self.temperature);
        Ok(rank(labels, probs))
    }
}

// ─────────────────────────────────────────────────────────────────────
//  Scoring helpers
// ─────────────────────────────────────────────────────────────────────

/// Drop blank and duplicate labels, keeping first-seen order.
pub fn dedup_labels(labels: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for l in labels {
        let l = l.trim();
        if !l.is_empty() && !out.iter().any(|o| o == l) {
            out.push(l.to_string());
        }
    }
    out
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a
        .iter()
        .zip(b)
        .map(|(x, y)| x * y)
        .sum();
    let na: f32 = a
        .iter()
        .map(|x| x * x)
        .sum::<f32>()
        .sqrt();
    let nb: f32 = b
        .iter()
        .map(|x| x * x)
        .sum::<f32>()
        .sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

/// Numerically stable softmax of `values / temperature`.
pub fn softmax(values: &[f32], temperature: f32) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values
        .iter()
        .map(|v| ((v - max) / temperature).exp())
        .collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter()
        .map(|e| e / sum)
        .collect()
}

/// Sort labels by descending probability (stable for ties).
fn rank(labels: Vec<String>, probs: Vec<f32>) -> Classification {
    let mut pairs: Vec<(String, f32)> = labels.into_iter().zip(probs).collect();
    pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
    let (labels, scores): (Vec<String>, Vec<f32>) = pairs.into_iter().unzip();
    Classification {
        label: labels[0].clone(),
        labels,
        scores,
    }
}

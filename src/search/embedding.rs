//! Embedding provider and backends
//!
//! The default backend is Harmonic Token Projection (HTP), a deterministic,
//! training-free embedding method based on:
//! "Harmonic Token Projection: A Vocabulary-Free, Training-Free,
//!  Deterministic, and Reversible Embedding Methodology"
//! https://arxiv.org/html/2511.20665
//!
//! Key properties:
//! - No neural network or model files required
//! - Deterministic (same input → same output)
//! - Unicode-based (multilingual support)

use std::f64::consts::PI;
use std::sync::OnceLock;

use thiserror::Error;
use tracing::{info, warn};

use crate::core::config::{EmbeddingBackendKind, EmbeddingConfig};

/// Embedding dimension (2 * number of coprime moduli)
pub const EMBEDDING_DIM: usize = 384;

/// Identifier stamped on every index built with the HTP backend.
pub const HTP_MODEL_ID: &str = "htp-384-v1";

/// Number of coprime moduli for harmonic projection
const NUM_MODULI: usize = EMBEDDING_DIM / 2;

/// Maximum token length (Unicode code points)
const MAX_TOKEN_LENGTH: usize = 64;

/// Coprime moduli for modular decomposition
/// Using first NUM_MODULI primes for guaranteed coprimality
static COPRIME_MODULI: &[u64] = &[
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71,
    73, 79, 83, 89, 97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151,
    157, 163, 167, 173, 179, 181, 191, 193, 197, 199, 211, 223, 227, 229, 233,
    239, 241, 251, 257, 263, 269, 271, 277, 281, 283, 293, 307, 311, 313, 317,
    331, 337, 347, 349, 353, 359, 367, 373, 379, 383, 389, 397, 401, 409, 419,
    421, 431, 433, 439, 443, 449, 457, 461, 463, 467, 479, 487, 491, 499, 503,
    509, 521, 523, 541, 547, 557, 563, 569, 571, 577, 587, 593, 599, 601, 607,
    613, 617, 619, 631, 641, 643, 647, 653, 659, 661, 673, 677, 683, 691, 701,
    709, 719, 727, 733, 739, 743, 751, 757, 761, 769, 773, 787, 797, 809, 811,
    821, 823, 827, 829, 839, 853, 857, 859, 863, 877, 881, 883, 887, 907, 911,
    919, 929, 937, 941, 947, 953, 967, 971, 977, 983, 991, 997, 1009, 1013,
    1019, 1021, 1031, 1033, 1039, 1049, 1051, 1061, 1063, 1069, 1087, 1091,
    1093, 1097, 1103, 1109, 1117, 1123, 1129, 1151, 1153, 1163, 1171, 1181,
];

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding provider is unavailable")]
    Unavailable,
    #[error("embedding model failed to load: {0}")]
    Load(String),
    #[error("embedding failed: {0}")]
    Backend(String),
}

/// A concrete text-embedding model.
pub trait EmbeddingBackend: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Load model assets. Called at most once, before the first `embed`.
    fn load(&self) -> Result<(), EmbedError>;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Wraps a backend with one-shot initialization.
///
/// After a failed `initialize` every `embed` fails fast with
/// [`EmbedError::Unavailable`]; the load is never retried.
pub struct EmbeddingProvider {
    backend: Box<dyn EmbeddingBackend>,
    ready: OnceLock<bool>,
    max_input_chars: usize,
}

impl EmbeddingProvider {
    pub fn new(backend: Box<dyn EmbeddingBackend>, max_input_chars: usize) -> Self {
        Self {
            backend,
            ready: OnceLock::new(),
            max_input_chars,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let backend: Box<dyn EmbeddingBackend> = match config.backend {
            EmbeddingBackendKind::Htp => Box::new(HtpModel::new()),
            EmbeddingBackendKind::Disabled => Box::new(DisabledBackend),
        };
        Self::new(backend, config.max_input_chars)
    }

    /// Load the backend once. Later calls report the first outcome.
    pub fn initialize(&self) -> Result<(), EmbedError> {
        let mut load_error = None;
        let ready = *self.ready.get_or_init(|| match self.backend.load() {
            Ok(()) => {
                info!(
                    model = self.backend.model_id(),
                    dimension = self.backend.dimension(),
                    "embedding provider ready"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, "embedding provider unavailable, keyword search only");
                load_error = Some(e);
                false
            }
        });

        match (ready, load_error) {
            (true, _) => Ok(()),
            (false, Some(e)) => Err(e),
            (false, None) => Err(EmbedError::Unavailable),
        }
    }

    pub fn is_available(&self) -> bool {
        self.ready.get().copied().unwrap_or(false)
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if !self.is_available() {
            return Err(EmbedError::Unavailable);
        }
        let vector = self.backend.embed(text)?;
        if vector.len() != self.backend.dimension() {
            return Err(EmbedError::Backend(format!(
                "expected {} dimensions, got {}",
                self.backend.dimension(),
                vector.len()
            )));
        }
        Ok(vector)
    }

    /// Embed a note as its title followed by its body.
    pub fn embed_document(&self, title: &str, body: &str) -> Result<Vec<f32>, EmbedError> {
        let text: String = format!("{title}\n\n{body}")
            .chars()
            .take(self.max_input_chars)
            .collect();
        self.embed(&text)
    }
}

/// HTP Embedding Model
///
/// Implements Harmonic Token Projection for deterministic text embeddings
pub struct HtpModel {
    moduli: Vec<u64>,
}

impl HtpModel {
    pub fn new() -> Self {
        Self {
            moduli: COPRIME_MODULI[..NUM_MODULI].to_vec(),
        }
    }

    /// Generate embedding for a single text
    ///
    /// Algorithm:
    /// 1. Tokenize text into words
    /// 2. Embed each token using harmonic projection
    /// 3. Average token embeddings (mean pooling)
    /// 4. L2 normalize result
    fn embed_text(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);

        if tokens.is_empty() {
            return vec![0.0; EMBEDDING_DIM];
        }

        let mut sum_embedding = vec![0.0f64; EMBEDDING_DIM];
        for token in &tokens {
            for (i, val) in self.embed_token(token).iter().enumerate() {
                sum_embedding[i] += val;
            }
        }

        // Mean pooling
        let count = tokens.len() as f64;
        for val in &mut sum_embedding {
            *val /= count;
        }

        // L2 normalize and convert to f32
        let norm: f64 = sum_embedding.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            sum_embedding.iter().map(|x| (*x / norm) as f32).collect()
        } else {
            sum_embedding.iter().map(|x| *x as f32).collect()
        }
    }

    /// Embed a single token using Harmonic Token Projection
    ///
    /// Steps:
    /// 1. Convert token to Unicode code points
    /// 2. Encode as base-2^16 integer N
    /// 3. For each modulus m_i, compute r_i = N mod m_i
    /// 4. Project to unit circle: E_i = [sin(2πr_i/m_i), cos(2πr_i/m_i)]
    fn embed_token(&self, token: &str) -> Vec<f64> {
        let n = token_to_integer(token);

        let mut embedding = Vec::with_capacity(EMBEDDING_DIM);
        for &m in &self.moduli {
            let r = n % m;
            let theta = 2.0 * PI * (r as f64) / (m as f64);
            embedding.push(theta.sin());
            embedding.push(theta.cos());
        }

        embedding
    }
}

impl Default for HtpModel {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingBackend for HtpModel {
    fn model_id(&self) -> &str {
        HTP_MODEL_ID
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn load(&self) -> Result<(), EmbedError> {
        Ok(())
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.embed_text(text))
    }
}

/// Backend for deployments that want keyword search only.
pub struct DisabledBackend;

impl EmbeddingBackend for DisabledBackend {
    fn model_id(&self) -> &str {
        "disabled"
    }

    fn dimension(&self) -> usize {
        0
    }

    fn load(&self) -> Result<(), EmbedError> {
        Err(EmbedError::Load("semantic search disabled in config".to_string()))
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Unavailable)
    }
}

/// N = Σ u_j * B^(L-j) where B = 2^16, with wrapping overflow
fn token_to_integer(token: &str) -> u64 {
    token
        .chars()
        .take(MAX_TOKEN_LENGTH)
        .fold(0u64, |n, c| n.wrapping_mul(65536).wrapping_add(c as u64))
}

/// Splits text into lowercase words
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// Cosine similarity between two embeddings.
///
/// Zero when the lengths differ or either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Test backends shared by the index and engine tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// HTP, except any text containing `poison` fails to embed.
    pub struct PoisonedBackend(pub HtpModel);

    impl EmbeddingBackend for PoisonedBackend {
        fn model_id(&self) -> &str {
            HTP_MODEL_ID
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIM
        }

        fn load(&self) -> Result<(), EmbedError> {
            Ok(())
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            if text.contains("poison") {
                return Err(EmbedError::Backend("poisoned input".to_string()));
            }
            self.0.embed(text)
        }
    }

    /// HTP that takes `delay` to embed any text containing `slow`.
    pub struct SlowBackend {
        pub model: HtpModel,
        pub delay: std::time::Duration,
    }

    impl EmbeddingBackend for SlowBackend {
        fn model_id(&self) -> &str {
            HTP_MODEL_ID
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIM
        }

        fn load(&self) -> Result<(), EmbedError> {
            Ok(())
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            if text.contains("slow") {
                std::thread::sleep(self.delay);
            }
            self.model.embed(text)
        }
    }

    /// Simulates missing model assets.
    pub struct MissingAssetsBackend;

    impl EmbeddingBackend for MissingAssetsBackend {
        fn model_id(&self) -> &str {
            "missing"
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIM
        }

        fn load(&self) -> Result<(), EmbedError> {
            Err(EmbedError::Load("model.onnx not found".to_string()))
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            panic!("embed called on a backend that never loaded")
        }
    }

    pub fn ready_provider(backend: Box<dyn EmbeddingBackend>) -> EmbeddingProvider {
        let provider = EmbeddingProvider::new(backend, 8000);
        provider.initialize().unwrap();
        provider
    }
}

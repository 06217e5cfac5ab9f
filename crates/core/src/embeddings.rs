use crate::text::normalize;

const DEFAULT: usize = 256;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Black-box "text to fixed-dimension vector" capability. Production wires a
/// remote embedding provider behind this; the hash embedder below keeps the
/// engine usable offline and in tests.
pub trait Embedder {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Deterministic character-trigram hash embedder. Input is normalized first
/// so accent and case variants of the same query land on the same vector.
#[derive(Debug, Clone, Copy)]
pub struct HashingNgramEmbedder {
    pub dimensions: usize,
}

impl Default for HashingNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for HashingNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let normalized = normalize(text);
        let chars: Vec<char> = normalized.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3.min(chars.len())) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

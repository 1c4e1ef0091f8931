#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 64,
            seed: 1337,
        }
    }
}

/// Offline bag-of-words embedder. Buckets come from blake3, so vectors are
/// identical across processes, machines and toolchains.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions.max(1)
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dims = self.dimensions();
        let mut vector = vec![0f32; dims];
        for token in tokens(text) {
            let bucket = self.bucket_for(&token);
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }

    fn bucket_for(&self, token: &str) -> usize {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.config.seed.to_le_bytes());
        hasher.update(token.as_bytes());
        let hash = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        (u64::from_le_bytes(prefix) % self.dimensions() as u64) as usize
    }
}

/// Lowercased alphanumeric runs; markup punctuation never forms a token.
pub fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_unit_length_and_deterministic() {
        let embedder = HashEmbedder::new(HashEmbedderConfig::default());
        let a = embedder.embed_text("Images need alternative text");
        let b = embedder.embed_text("images NEED alternative text!");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = HashEmbedder::new(HashEmbedderConfig {
            dimensions: 8,
            seed: 7,
        });
        assert_eq!(embedder.embed_text("<> ///"), vec![0.0; 8]);
    }

    #[test]
    fn tokens_split_markup() {
        let collected: Vec<String> = tokens("<img alt=\"Logo\">").collect();
        assert_eq!(collected, vec!["img", "alt", "logo"]);
    }
}

use crate::error::{FaceIdError, FaceIdResult};

/// Default acceptance threshold. Only meaningful for the embedding space it was
/// tuned on; re-tune when the recognizer model changes.
pub const DEFAULT_THRESHOLD: f32 = 0.45;

/// Euclidean distance between two embeddings of equal length.
///
/// Squares are accumulated in f64 so long vectors do not lose precision; the
/// result is reported in the embedding's own f32 space.
pub fn euclidean_distance(stored: &[f32], probe: &[f32]) -> FaceIdResult<f32> {
    if stored.len() != probe.len() {
        return Err(FaceIdError::EmbeddingDimensionMismatch {
            stored: stored.len(),
            probe: probe.len(),
        });
    }

    let sum: f64 = stored
        .iter()
        .zip(probe)
        .map(|(a, b)| {
            let d = *a as f64 - *b as f64;
            d * d
        })
        .sum();
    Ok(sum.sqrt() as f32)
}

/// Fixed-threshold accept/reject rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    threshold: f32,
}

impl MatchPolicy {
    pub fn new(threshold: f32) -> anyhow::Result<Self> {
        if !threshold.is_finite() || threshold <= 0.0 {
            anyhow::bail!("match threshold must be a positive finite number, got {threshold}");
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Strict: a distance equal to the threshold is rejected.
    pub fn accepts(&self, distance: f32) -> bool {
        distance < self.threshold
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

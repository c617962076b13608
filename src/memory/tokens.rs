//! Token estimation for the sliding window

/// Best-effort token counter
///
/// A model-aware tokenizer can be plugged in through
/// [`MemoryManager::with_estimator`](super::MemoryManager::with_estimator).
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// Length-based approximation: one token per `bytes_per_token` bytes
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    pub bytes_per_token: usize,
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self { bytes_per_token: 4 }
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.len() / self.bytes_per_token.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_ratio() {
        let estimator = CharRatioEstimator::default();
        assert_eq!(estimator.estimate(""), 0);
        assert_eq!(estimator.estimate("abc"), 0);
        assert_eq!(estimator.estimate(&"x".repeat(400)), 100);

        let zero = CharRatioEstimator { bytes_per_token: 0 };
        assert_eq!(zero.estimate("abcd"), 4);
    }
}

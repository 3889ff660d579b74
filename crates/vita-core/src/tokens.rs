use serde::{Deserialize, Serialize};

/// Token counts reported by the provider for one inference call, or summed over several.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self { input_tokens, output_tokens }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens as u64 + self.output_tokens as u64
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_saturates() {
        let mut acc = TokenUsage::default();
        acc.add(&TokenUsage::new(100, 20));
        acc.add(&TokenUsage::new(50, 5));
        assert_eq!(acc, TokenUsage::new(150, 25));
        assert_eq!(acc.total(), 175);

        let mut big = TokenUsage::new(u32::MAX, 0);
        big.add(&TokenUsage::new(10, 0));
        assert_eq!(big.input_tokens, u32::MAX);
    }
}

use serde::{Deserialize, Serialize};

/// Token usage for one or more model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Usage {
    /// Number of input (prompt) tokens.
    #[serde(default)]
    pub input_tokens: u64,

    /// Number of output (completion) tokens.
    #[serde(default)]
    pub output_tokens: u64,

    /// Total tokens. When a vendor does not report one this is
    /// `input_tokens + output_tokens`.
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Build a usage record from input/output counts, deriving the total.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Build a usage record keeping a vendor-reported total when present.
    pub fn with_total(input_tokens: u64, output_tokens: u64, total_tokens: Option<u64>) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: total_tokens.unwrap_or(input_tokens + output_tokens),
        }
    }

    /// Add another usage record field-by-field.
    ///
    /// Multi-step loops sum every call's usage; vendor grand totals are
    /// added as reported, even when that double-counts cached input.
    pub fn add(&self, other: &Usage) -> Usage {
        Usage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_total() {
        let usage = Usage::new(10, 3);
        assert_eq!(usage.total_tokens, 13);
    }

    #[test]
    fn test_with_total_prefers_reported() {
        let usage = Usage::with_total(10, 3, Some(15));
        assert_eq!(usage.total_tokens, 15);
        let derived = Usage::with_total(10, 3, None);
        assert_eq!(derived.total_tokens, 13);
    }

    #[test]
    fn test_add_is_fieldwise() {
        let a = Usage::new(10, 5);
        let b = Usage::new(7, 2);
        let sum = a.add(&b);
        assert_eq!(sum.input_tokens, 17);
        assert_eq!(sum.output_tokens, 7);
        assert_eq!(sum.total_tokens, 24);
    }
}

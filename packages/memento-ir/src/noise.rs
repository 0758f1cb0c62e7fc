//! Stop-name filtering (§4.1): trivial identifiers that would otherwise flood
//! symbol emission and reference-candidate lists with noise (test-framework
//! globals, DOM globals, and similar).

use std::collections::HashSet;

const DEFAULT_STOP_NAMES: &[&str] = &[
    "describe", "it", "test", "beforeEach", "afterEach", "beforeAll", "afterAll", "expect",
    "console", "window", "document", "global", "globalThis", "self", "__name__", "__main__",
    "print", "len", "str", "int", "bool",
];

/// A configurable set of names excluded from symbol/reference emission.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    stop_names: HashSet<String>,
}

impl NoiseFilter {
    pub fn new(extra: impl IntoIterator<Item = String>) -> Self {
        let mut stop_names: HashSet<String> = DEFAULT_STOP_NAMES.iter().map(|s| s.to_string()).collect();
        stop_names.extend(extra);
        Self { stop_names }
    }

    pub fn is_noise(&self, name: &str) -> bool {
        self.stop_names.contains(name)
    }
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self::new(std::iter::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stop_names_filtered() {
        let filter = NoiseFilter::default();
        assert!(filter.is_noise("describe"));
        assert!(filter.is_noise("console"));
        assert!(!filter.is_noise("myFunction"));
    }

    #[test]
    fn test_extra_stop_names_merged() {
        let filter = NoiseFilter::new(vec!["myGlobal".to_string()]);
        assert!(filter.is_noise("myGlobal"));
        assert!(filter.is_noise("describe"));
    }
}

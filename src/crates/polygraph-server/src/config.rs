//! Runtime configuration from environment variables
//!
//! | Variable | Default | Minimum |
//! |---|---|---|
//! | `HTTP_ADDR` | `0.0.0.0:8080` | — |
//! | `POLICY_CACHE_MAX_ITEMS` | `1024` | 1 |
//! | `POLICY_MAX_STEPS` | `10000` | 1 |
//! | `POLICY_OBS_BUFFER` | `4096` | 1 |
//!
//! Unset, unparseable or below-minimum values fall back to the default.

/// Server runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Listen address for the HTTP server.
    pub http_addr: String,
    /// Policy cache capacity.
    pub cache_max_items: usize,
    /// Walk step bound.
    pub policy_max_steps: usize,
    /// Async latency observer buffer size.
    pub obs_buffer: usize,
}

impl RuntimeConfig {
    /// Read the configuration from the process environment.
    pub fn load() -> Self {
        Self {
            http_addr: env_string("HTTP_ADDR", "0.0.0.0:8080"),
            cache_max_items: env_usize("POLICY_CACHE_MAX_ITEMS", 1024, 1),
            policy_max_steps: env_usize("POLICY_MAX_STEPS", 10_000, 1),
            obs_buffer: env_usize("POLICY_OBS_BUFFER", 4096, 1),
        }
    }
}

fn env_string(key: &str, fallback: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn env_usize(key: &str, fallback: usize, min: usize) -> usize {
    match std::env::var(key).ok().and_then(|value| value.parse::<usize>().ok()) {
        Some(value) if value >= min => value,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        std::env::remove_var("POLYGRAPH_TEST_UNSET");
        assert_eq!(env_usize("POLYGRAPH_TEST_UNSET", 1024, 1), 1024);
        assert_eq!(env_string("POLYGRAPH_TEST_UNSET", ":8080"), ":8080");
    }

    #[test]
    fn test_parseable_value_wins() {
        std::env::set_var("POLYGRAPH_TEST_MAX", "42");
        assert_eq!(env_usize("POLYGRAPH_TEST_MAX", 1024, 1), 42);
    }

    #[test]
    fn test_garbage_and_below_minimum_fall_back() {
        std::env::set_var("POLYGRAPH_TEST_BAD", "not-a-number");
        assert_eq!(env_usize("POLYGRAPH_TEST_BAD", 7, 1), 7);

        std::env::set_var("POLYGRAPH_TEST_ZERO", "0");
        assert_eq!(env_usize("POLYGRAPH_TEST_ZERO", 7, 1), 7);
    }

    #[test]
    fn test_empty_string_falls_back() {
        std::env::set_var("POLYGRAPH_TEST_EMPTY", "");
        assert_eq!(env_string("POLYGRAPH_TEST_EMPTY", ":8080"), ":8080");
    }
}

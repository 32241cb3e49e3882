//! API key lookup for hosted providers

use kiln_core::{ProviderError, Result};
use std::env;

const FALLBACK_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Resolve an API key
///
/// Priority:
/// 1. The configured environment variable
/// 2. ANTHROPIC_API_KEY
pub fn resolve_api_key(configured_env: &str) -> Result<String> {
    if let Ok(key) = env::var(configured_env) {
        if !key.trim().is_empty() {
            tracing::debug!("Using API key from {}", configured_env);
            return Ok(key);
        }
    }

    if configured_env != FALLBACK_KEY_ENV {
        if let Ok(key) = env::var(FALLBACK_KEY_ENV) {
            if !key.trim().is_empty() {
                tracing::debug!("Using API key from {}", FALLBACK_KEY_ENV);
                return Ok(key);
            }
        }
    }

    Err(ProviderError::Auth(format!(
        "No API key found. Set {} (or {}).",
        configured_env, FALLBACK_KEY_ENV
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to prevent concurrent env var modifications
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap();

        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let result = f();

        for (key, original) in originals {
            match original {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        result
    }

    #[test]
    fn test_configured_env_wins() {
        with_env_vars(
            &[
                ("KILN_TEST_KEY", Some("configured")),
                ("ANTHROPIC_API_KEY", Some("fallback")),
            ],
            || {
                assert_eq!(resolve_api_key("KILN_TEST_KEY").unwrap(), "configured");
            },
        );
    }

    #[test]
    fn test_fallback_env() {
        with_env_vars(
            &[
                ("KILN_TEST_KEY", None),
                ("ANTHROPIC_API_KEY", Some("fallback")),
            ],
            || {
                assert_eq!(resolve_api_key("KILN_TEST_KEY").unwrap(), "fallback");
            },
        );
    }

    #[test]
    fn test_missing_key_is_auth_error() {
        with_env_vars(
            &[("KILN_TEST_KEY", None), ("ANTHROPIC_API_KEY", None)],
            || {
                let err = resolve_api_key("KILN_TEST_KEY").unwrap_err();
                assert!(matches!(
                    err,
                    kiln_core::KilnError::Provider(ProviderError::Auth(_))
                ));
            },
        );
    }
}

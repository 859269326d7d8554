//! Process-wide configuration
//!
//! Read once at startup from the environment (and an optional `.env` file) and
//! shared read-only with every request afterwards.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Upstream chat-completion provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenRouter,
    OpenAi,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "openrouter",
            Provider::OpenAi => "openai",
        }
    }

    /// Name of the environment variable holding this provider's API key.
    pub fn key_name(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "OPENROUTER_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
        }
    }

    fn model_var(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "OPENROUTER_MODEL",
            Provider::OpenAi => "OPENAI_MODEL",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Provider::OpenRouter => OPENROUTER_URL,
            Provider::OpenAi => OPENAI_URL,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "openai/gpt-4o-mini",
            Provider::OpenAi => "gpt-4o-mini",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Ok(Provider::OpenRouter),
            "openai" => Ok(Provider::OpenAi),
            other => Err(Error::Config(format!(
                "Unknown UPSTREAM_PROVIDER '{}' (expected openrouter or openai)",
                other
            ))),
        }
    }
}

/// Rate-limit retry policy used by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for one logical call, including the first.
    pub max_attempts: u32,
    /// First backoff delay; doubled for every further attempt.
    pub base_delay: Duration,
    /// Ceiling applied to computed delays and to provider `retry-after` hints.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff schedule: `base`, `2 * base`, `4 * base`, ... clamped to `max_delay`.
    ///
    /// `ExponentialBackoff::from_millis(2)` yields 2, 4, 8, ... so the factor
    /// is half the base delay (whole milliseconds, rounded down to even).
    pub fn backoff(&self) -> ExponentialBackoff {
        let half = (self.base_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(half)
            .max_delay(self.max_delay)
    }

    /// Delay before the next attempt. A nonzero `retry_after` hint wins over
    /// the computed schedule, which still advances.
    pub fn next_delay(
        &self,
        retry_after: Option<Duration>,
        schedule: &mut impl Iterator<Item = Duration>,
    ) -> Duration {
        let computed = schedule.next().unwrap_or(self.max_delay);
        match retry_after {
            Some(hint) if !hint.is_zero() => hint.min(self.max_delay),
            _ => computed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider: Provider,
    pub api_key: Option<String>,
    pub upstream_url: String,
    pub default_model: String,
    pub translate_model: String,
    pub translate_fallback_models: Vec<String>,
    pub translate_attempts: u32,
    pub default_temperature: f64,
    pub app_url: String,
    pub app_name: String,
    pub access_key: Option<String>,
    pub bind_addr: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let provider = match var("UPSTREAM_PROVIDER") {
            Some(raw) => raw.parse()?,
            None => Provider::OpenRouter,
        };

        let default_model = var(provider.model_var())
            .or_else(|| var("DEFAULT_MODEL"))
            .unwrap_or_else(|| provider.default_model().to_string());

        let translate_fallback_models = var("TRANSLATE_FALLBACK_MODELS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let retry = RetryPolicy {
            max_attempts: parse_var(&var, "RETRY_MAX_ATTEMPTS")?.unwrap_or(3),
            base_delay: Duration::from_millis(
                parse_var(&var, "RETRY_BASE_DELAY_MS")?.unwrap_or(500),
            ),
            max_delay: Duration::from_millis(
                parse_var(&var, "RETRY_MAX_DELAY_MS")?.unwrap_or(30_000),
            ),
        };
        if retry.max_attempts == 0 {
            return Err(Error::Config(
                "RETRY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let translate_attempts = parse_var(&var, "TRANSLATE_ATTEMPTS")?.unwrap_or(2);
        if translate_attempts == 0 {
            return Err(Error::Config(
                "TRANSLATE_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            provider,
            api_key: var(provider.key_name()),
            upstream_url: var("UPSTREAM_URL")
                .unwrap_or_else(|| provider.default_endpoint().to_string()),
            translate_model: var("TRANSLATE_MODEL").unwrap_or_else(|| default_model.clone()),
            default_model,
            translate_fallback_models,
            translate_attempts,
            default_temperature: parse_var(&var, "DEFAULT_TEMPERATURE")?.unwrap_or(0.7),
            app_url: var("APP_URL").unwrap_or_else(|| "https://example.com".to_string()),
            app_name: var("APP_NAME").unwrap_or_else(|| "Firefly Prompt Proxy".to_string()),
            access_key: var("PROXY_ACCESS_KEY"),
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            request_timeout: Duration::from_secs(
                parse_var(&var, "REQUEST_TIMEOUT_SECS")?.unwrap_or(30),
            ),
            retry,
        })
    }

    /// Metadata headers sent upstream for attribution.
    pub fn meta_headers(&self) -> Vec<(String, String)> {
        match self.provider {
            Provider::OpenRouter => vec![
                ("HTTP-Referer".to_string(), self.app_url.clone()),
                ("X-Title".to_string(), self.app_name.clone()),
            ],
            Provider::OpenAi => Vec::new(),
        }
    }
}

fn parse_var<T, F>(var: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| Error::Config(format!("Invalid {} '{}': {}", key, raw, e)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_target_openrouter() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.provider, Provider::OpenRouter);
        assert_eq!(config.upstream_url, OPENROUTER_URL);
        assert_eq!(config.default_model, "openai/gpt-4o-mini");
        assert_eq!(config.translate_model, config.default_model);
        assert!(config.api_key.is_none());
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.translate_attempts, 2);
    }

    #[test]
    fn test_openai_provider_reads_its_own_key_and_model() {
        let config = config_from(&[
            ("UPSTREAM_PROVIDER", "OpenAI"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENROUTER_API_KEY", "or-test"),
            ("OPENAI_MODEL", "gpt-4.1-mini"),
        ])
        .unwrap();

        assert_eq!(config.provider, Provider::OpenAi);
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.default_model, "gpt-4.1-mini");
        assert_eq!(config.upstream_url, OPENAI_URL);
        assert!(config.meta_headers().is_empty());
    }

    #[test]
    fn test_blank_values_are_treated_as_unset() {
        let config = config_from(&[("OPENROUTER_API_KEY", "   ")]).unwrap();
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_fallback_models_are_split_and_trimmed() {
        let config = config_from(&[("TRANSLATE_FALLBACK_MODELS", " a/one, ,b/two ,")]).unwrap();
        assert_eq!(config.translate_fallback_models, vec!["a/one", "b/two"]);
    }

    #[test]
    fn test_invalid_numbers_are_config_errors() {
        let err = config_from(&[("DEFAULT_TEMPERATURE", "warm")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = config_from(&[("RETRY_MAX_ATTEMPTS", "0")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let err = config_from(&[("UPSTREAM_PROVIDER", "anthropic")]).unwrap_err();
        assert!(err.to_string().contains("anthropic"));
    }

    #[test]
    fn test_openrouter_meta_headers() {
        let config = config_from(&[("APP_URL", "https://app.test"), ("APP_NAME", "Console")])
            .unwrap();
        assert_eq!(
            config.meta_headers(),
            vec![
                ("HTTP-Referer".to_string(), "https://app.test".to_string()),
                ("X-Title".to_string(), "Console".to_string()),
            ]
        );
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        let delays: Vec<u128> = policy.backoff().take(4).map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000]);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(1500),
        };
        let delays: Vec<u128> = policy.backoff().take(3).map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![500, 1000, 1500]);
    }

    #[test]
    fn test_retry_after_overrides_schedule() {
        let policy = RetryPolicy::default();
        let mut schedule = policy.backoff();

        let first = policy.next_delay(Some(Duration::from_secs(2)), &mut schedule);
        assert_eq!(first, Duration::from_secs(2));

        // The schedule advanced even though the hint was used.
        let second = policy.next_delay(None, &mut schedule);
        assert_eq!(second, Duration::from_millis(1000));

        let zero_hint = policy.next_delay(Some(Duration::ZERO), &mut schedule);
        assert_eq!(zero_hint, Duration::from_millis(2000));
    }

    #[test]
    fn test_retry_after_is_clamped() {
        let policy = RetryPolicy::default();
        let mut schedule = policy.backoff();
        let delay = policy.next_delay(Some(Duration::from_secs(600)), &mut schedule);
        assert_eq!(delay, Duration::from_secs(30));
    }
}

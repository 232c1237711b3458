//! Configuration types, read once from the environment at startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use secrecy::SecretString;

use crate::channels::WhatsAppConfig;
use crate::error::ConfigError;
use crate::llm::{DEFAULT_MODELS, GatewayConfig, LlmBackend, LlmConfig, RetryPolicy};

/// Cron expressions (seconds field first) for the scheduled jobs.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub breakfast: String,
    pub lunch: String,
    pub dinner: String,
    pub onboarding: String,
    /// How often the scheduler checks for due jobs.
    pub tick_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            breakfast: "0 0 8 * * *".to_string(),
            lunch: "0 0 13 * * *".to_string(),
            dinner: "0 0 19 * * *".to_string(),
            onboarding: "0 0 10 * * *".to_string(),
            tick_interval: Duration::from_secs(30),
        }
    }
}

/// Everything the service needs, passed explicitly into constructors.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub whatsapp: WhatsAppConfig,
    /// Shared secret for the webhook verification handshake.
    pub verify_token: SecretString,
    pub llm: LlmConfig,
    pub gateway: GatewayConfig,
    pub db_path: PathBuf,
    pub port: u16,
    pub timezone: Tz,
    /// Recent turns fed to generation calls.
    pub context_turns: usize,
    pub schedules: ScheduleConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let require = |key: &str| -> Result<String, ConfigError> {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let whatsapp = WhatsAppConfig {
            access_token: SecretString::from(require("WHATSAPP_ACCESS_TOKEN")?),
            phone_number_id: require("WHATSAPP_PHONE_NUMBER_ID")?,
            api_base: or_default("WHATSAPP_API_BASE", "https://graph.facebook.com/v19.0"),
        };
        let verify_token = SecretString::from(require("WEBHOOK_VERIFY_TOKEN")?);

        let api_key = require("LLM_API_KEY")
            .or_else(|_| require("GEMINI_API_KEY"))
            .map_err(|_| ConfigError::MissingEnvVar("LLM_API_KEY".to_string()))?;
        let backend_name = or_default("MEAL_ASSIST_LLM_BACKEND", "gemini");
        let backend = LlmBackend::from_str(&backend_name).map_err(|message| {
            ConfigError::InvalidValue {
                key: "MEAL_ASSIST_LLM_BACKEND".to_string(),
                message,
            }
        })?;
        let models: Vec<String> = match get("MEAL_ASSIST_MODELS") {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
        };
        if models.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "MEAL_ASSIST_MODELS".to_string(),
                message: "at least one model is required".to_string(),
            });
        }

        let max_retries: u32 = or_default("MEAL_ASSIST_MAX_RETRIES", "3")
            .parse()
            .unwrap_or(3);
        let retry_base_ms: u64 = or_default("MEAL_ASSIST_RETRY_BASE_MS", "1000")
            .parse()
            .unwrap_or(1000);
        let call_timeout_secs: u64 = or_default("MEAL_ASSIST_CALL_TIMEOUT_SECS", "30")
            .parse()
            .unwrap_or(30);

        let timezone_name = or_default("MEAL_ASSIST_TIMEZONE", "Asia/Kolkata");
        let timezone = Tz::from_str(&timezone_name).map_err(|e| ConfigError::InvalidValue {
            key: "MEAL_ASSIST_TIMEZONE".to_string(),
            message: e.to_string(),
        })?;

        let defaults = ScheduleConfig::default();
        let schedules = ScheduleConfig {
            breakfast: or_default("MEAL_ASSIST_BREAKFAST_CRON", &defaults.breakfast),
            lunch: or_default("MEAL_ASSIST_LUNCH_CRON", &defaults.lunch),
            dinner: or_default("MEAL_ASSIST_DINNER_CRON", &defaults.dinner),
            onboarding: or_default("MEAL_ASSIST_ONBOARDING_CRON", &defaults.onboarding),
            tick_interval: Duration::from_secs(
                or_default("MEAL_ASSIST_SCHEDULER_TICK_SECS", "30")
                    .parse()
                    .unwrap_or(30),
            ),
        };

        Ok(Self {
            whatsapp,
            verify_token,
            llm: LlmConfig {
                backend,
                api_key: SecretString::from(api_key),
                models,
            },
            gateway: GatewayConfig {
                retry: RetryPolicy::new(max_retries.max(1), Duration::from_millis(retry_base_ms)),
                call_timeout: Duration::from_secs(call_timeout_secs),
            },
            db_path: PathBuf::from(or_default("MEAL_ASSIST_DB_PATH", "./data/meal-assist.db")),
            port: or_default("MEAL_ASSIST_PORT", "8080").parse().unwrap_or(8080),
            timezone,
            context_turns: or_default("MEAL_ASSIST_CONTEXT_TURNS", "5")
                .parse()
                .unwrap_or(5),
            schedules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("WHATSAPP_ACCESS_TOKEN", "token"),
        ("WHATSAPP_PHONE_NUMBER_ID", "1234"),
        ("WEBHOOK_VERIFY_TOKEN", "verify"),
        ("GEMINI_API_KEY", "key"),
    ];

    #[test]
    fn defaults_fill_in() {
        let config = AppConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.timezone, chrono_tz::Asia::Kolkata);
        assert_eq!(config.context_turns, 5);
        assert_eq!(config.llm.backend, LlmBackend::Gemini);
        assert_eq!(config.llm.models.len(), DEFAULT_MODELS.len());
        assert_eq!(config.llm.api_key.expose_secret(), "key");
        assert_eq!(config.schedules.lunch, "0 0 13 * * *");
        assert_eq!(config.gateway.retry.max_attempts, 3);
    }

    #[test]
    fn missing_required_var_is_reported() {
        let err = AppConfig::from_lookup(lookup(&REQUIRED[1..])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "WHATSAPP_ACCESS_TOKEN"));
    }

    #[test]
    fn bad_numbers_fall_back_but_bad_timezone_fails() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MEAL_ASSIST_PORT", "not-a-port"));
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.port, 8080);

        pairs.push(("MEAL_ASSIST_TIMEZONE", "Mars/Olympus"));
        let err = AppConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "MEAL_ASSIST_TIMEZONE"));
    }

    #[test]
    fn model_list_is_parsed_in_order() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("MEAL_ASSIST_MODELS", "b-model, a-model"));
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.llm.models, vec!["b-model", "a-model"]);
    }
}

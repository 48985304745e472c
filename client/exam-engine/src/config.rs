use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Timing parameters of the session engine.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EngineSettings {
    /// Delay between the timer reaching zero and the automatic submission.
    pub grace_delay: Duration,
    /// Wall-clock cadence of the autosave scheduler.
    pub autosave_interval: Duration,
    /// Debounce applied to autosave requests triggered by answer changes.
    pub autosave_debounce: Duration,
    /// Every n-th running timer tick forces a snapshot write.
    pub forced_save_every_ticks: u32,
    /// Snapshots older than this are discarded on read.
    pub snapshot_max_age: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            grace_delay: Duration::from_millis(2000),
            autosave_interval: Duration::from_secs(30),
            autosave_debounce: Duration::from_millis(250),
            forced_save_every_ticks: 10,
            snapshot_max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub api_url: String,
    pub request_timeout: Duration,
    pub redis_uri: Option<String>,
    pub log_format: LogFormat,
    pub settings: EngineSettings,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl EngineConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/{env}.toml, overridden by APP__SECTION__KEY variables
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let api_url = settings
            .get_string("remote.api_url")
            .or_else(|_| env::var("EXAM_API_URL"))
            .unwrap_or_else(|_| "http://localhost:8081/api/v1".to_string());

        let request_timeout = Duration::from_millis(int_setting(
            &settings,
            "remote.timeout_ms",
            "EXAM_API_TIMEOUT_MS",
            10_000,
        ));

        let redis_uri = settings
            .get_string("store.redis_uri")
            .or_else(|_| env::var("REDIS_URI"))
            .ok()
            .filter(|uri| !uri.trim().is_empty());

        let log_format = match settings
            .get_string("log.format")
            .or_else(|_| env::var("APP_LOG_FORMAT"))
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let defaults = EngineSettings::default();
        let engine = EngineSettings {
            grace_delay: Duration::from_millis(int_setting(
                &settings,
                "session.grace_delay_ms",
                "EXAM_GRACE_DELAY_MS",
                defaults.grace_delay.as_millis() as u64,
            )),
            autosave_interval: Duration::from_secs(int_setting(
                &settings,
                "session.autosave_interval_secs",
                "EXAM_AUTOSAVE_INTERVAL_SECS",
                defaults.autosave_interval.as_secs(),
            )),
            autosave_debounce: Duration::from_millis(int_setting(
                &settings,
                "session.autosave_debounce_ms",
                "EXAM_AUTOSAVE_DEBOUNCE_MS",
                defaults.autosave_debounce.as_millis() as u64,
            )),
            forced_save_every_ticks: int_setting(
                &settings,
                "session.forced_save_every_ticks",
                "EXAM_FORCED_SAVE_EVERY_TICKS",
                u64::from(defaults.forced_save_every_ticks),
            ) as u32,
            snapshot_max_age: Duration::from_secs(
                int_setting(
                    &settings,
                    "session.snapshot_max_age_hours",
                    "EXAM_SNAPSHOT_MAX_AGE_HOURS",
                    defaults.snapshot_max_age.as_secs() / 3600,
                ) * 3600,
            ),
        };

        Ok(EngineConfig {
            api_url,
            request_timeout,
            redis_uri,
            log_format,
            settings: engine,
        })
    }
}

/// Positive integer from the layered config, then a plain env var, then the default.
fn int_setting(settings: &config::Config, key: &str, env_key: &str, default: u64) -> u64 {
    settings
        .get_int(key)
        .ok()
        .and_then(|v| u64::try_from(v).ok())
        .or_else(|| env::var(env_key).ok().and_then(|v| v.parse::<u64>().ok()))
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "EXAM_API_URL",
        "EXAM_GRACE_DELAY_MS",
        "EXAM_FORCED_SAVE_EVERY_TICKS",
        "REDIS_URI",
        "APP_LOG_FORMAT",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_without_overrides() {
        clear_env();
        let config = EngineConfig::load().unwrap();
        assert_eq!(config.settings, EngineSettings::default());
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.redis_uri.is_none());
    }

    #[test]
    #[serial]
    fn env_vars_override_defaults() {
        clear_env();
        env::set_var("EXAM_API_URL", "http://exams.test/api");
        env::set_var("EXAM_GRACE_DELAY_MS", "500");
        env::set_var("EXAM_FORCED_SAVE_EVERY_TICKS", "5");
        env::set_var("REDIS_URI", "redis://127.0.0.1:6379/3");
        env::set_var("APP_LOG_FORMAT", "JSON");

        let config = EngineConfig::load().unwrap();
        assert_eq!(config.api_url, "http://exams.test/api");
        assert_eq!(config.settings.grace_delay, Duration::from_millis(500));
        assert_eq!(config.settings.forced_save_every_ticks, 5);
        assert_eq!(config.redis_uri.as_deref(), Some("redis://127.0.0.1:6379/3"));
        assert_eq!(config.log_format, LogFormat::Json);

        clear_env();
    }

    #[test]
    #[serial]
    fn zero_values_fall_back_to_defaults() {
        clear_env();
        env::set_var("EXAM_GRACE_DELAY_MS", "0");
        let config = EngineConfig::load().unwrap();
        assert_eq!(config.settings.grace_delay, Duration::from_millis(2000));
        clear_env();
    }
}

//! Script-level and run-level configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{BotStatus, Result, SieveError};

// ---------------------------------------------------------------------------
// ScriptSettings — the `[SETTINGS]` block of a script
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptSettings {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "AdditionalInfo")]
    pub additional_info: String,
    #[serde(alias = "CustomInputs")]
    pub custom_inputs: Vec<CustomInput>,
    #[serde(alias = "InputRules")]
    pub input_rules: Vec<InputRule>,
}

/// A value asked from the user before the run starts and exposed to the
/// script as a variable of the same name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomInput {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Description")]
    pub description: String,
    #[serde(alias = "Value")]
    pub value: String,
}

/// Records whose `field` does not match `regex` are dropped before the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRule {
    #[serde(rename = "name", alias = "Name")]
    pub field: InputField,
    #[serde(alias = "Regex")]
    pub regex: String,
}

/// Which part of a record an [`InputRule`] applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum InputField {
    Record,
    Username,
    Password,
}

impl InputField {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputField::Record => "input",
            InputField::Username => "input.user",
            InputField::Password => "input.pass",
        }
    }
}

impl TryFrom<String> for InputField {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "input" | "record" => Ok(InputField::Record),
            "input.user" | "input.username" | "username" => Ok(InputField::Username),
            "input.pass" | "input.password" | "password" => Ok(InputField::Password),
            other => Err(format!("unknown input rule target '{}'", other)),
        }
    }
}

impl From<InputField> for String {
    fn from(value: InputField) -> Self {
        value.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// RunSettings — process-wide configuration file
// ---------------------------------------------------------------------------

/// Run configuration loaded from `settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunSettings {
    pub output_directory: String,
    pub output_separator: String,
    pub request_timeout_ms: u64,
    pub user_agents_directory: String,
    pub checkpoint_path: String,
    pub checkpoint_interval_ms: u64,
    pub proxy_health_interval_ms: u64,
    pub retry: RetryPolicy,
    pub browser: BrowserSettings,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            output_directory: "results".into(),
            output_separator: " | ".into(),
            request_timeout_ms: 15_000,
            user_agents_directory: "user-agents".into(),
            checkpoint_path: "checkpoints.json".into(),
            checkpoint_interval_ms: 1_000,
            proxy_health_interval_ms: 100,
            retry: RetryPolicy::default(),
            browser: BrowserSettings::default(),
        }
    }
}

impl RunSettings {
    /// Read settings from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&data)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize these settings to JSON and write them to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load settings from `path`, writing the defaults there first if the
    /// file does not exist yet.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if !path.exists() {
            let settings = Self::default();
            settings.save(path)?;
            tracing::info!(path = %path.display(), "Generated default settings file");
            return Ok(settings);
        }
        Self::load(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(SieveError::Config("retry.maxAttempts must be at least 1".into()));
        }
        if self.checkpoint_interval_ms == 0 || self.proxy_health_interval_ms == 0 {
            return Err(SieveError::Config(
                "checkpointIntervalMs and proxyHealthIntervalMs must be positive".into(),
            ));
        }
        if self.output_directory.trim().is_empty() {
            return Err(SieveError::Config("outputDirectory must not be empty".into()));
        }
        Ok(())
    }
}

/// Which statuses end an attempt early, which ones trigger another attempt,
/// and how many attempts a record gets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub breaking: Vec<BotStatus>,
    pub recheckable: Vec<BotStatus>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            breaking: vec![
                BotStatus::ToCheck,
                BotStatus::Failure,
                BotStatus::Retry,
                BotStatus::Ban,
                BotStatus::Error,
            ],
            recheckable: vec![BotStatus::Retry, BotStatus::Ban, BotStatus::Error],
        }
    }
}

impl RetryPolicy {
    pub fn is_breaking(&self, status: &BotStatus) -> bool {
        self.breaking.iter().any(|s| s.same_as(status))
    }

    pub fn is_recheckable(&self, status: &BotStatus) -> bool {
        self.recheckable.iter().any(|s| s.same_as(status))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub width: u32,
    pub height: u32,
    pub slow_mo_ms: u64,
    pub timeout_ms: u64,
    /// Path to a Chrome/Chromium binary; auto-detected when unset.
    pub executable: Option<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            width: 1280,
            height: 720,
            slow_mo_ms: 0,
            timeout_ms: 30_000,
            executable: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_settings_parse_camel_case() {
        let json = r#"{
            "name": "demo",
            "additionalInfo": "needs a key",
            "customInputs": [{"name": "apiKey", "description": "API key"}],
            "inputRules": [{"name": "input.user", "regex": "^[a-z]+$"}]
        }"#;
        let settings: ScriptSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.name, "demo");
        assert_eq!(settings.additional_info, "needs a key");
        assert_eq!(settings.custom_inputs[0].name, "apiKey");
        assert_eq!(settings.custom_inputs[0].value, "");
        assert_eq!(settings.input_rules[0].field, InputField::Username);
    }

    #[test]
    fn script_settings_accept_pascal_case() {
        let json = r#"{"Name": "legacy", "InputRules": [{"Name": "INPUT.PASSWORD", "Regex": "."}]}"#;
        let settings: ScriptSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.name, "legacy");
        assert_eq!(settings.input_rules[0].field, InputField::Password);
    }

    #[test]
    fn unknown_input_rule_target_is_rejected() {
        let json = r#"{"inputRules": [{"name": "input.email", "regex": "."}]}"#;
        assert!(serde_json::from_str::<ScriptSettings>(json).is_err());
    }

    #[test]
    fn run_settings_defaults() {
        let settings = RunSettings::default();
        assert_eq!(settings.output_directory, "results");
        assert_eq!(settings.output_separator, " | ");
        assert_eq!(settings.request_timeout_ms, 15_000);
        assert_eq!(settings.retry.max_attempts, 8);
        assert!(settings.browser.headless);
        assert_eq!(settings.browser.timeout_ms, 30_000);
    }

    #[test]
    fn run_settings_partial_file_fills_defaults() {
        let settings: RunSettings =
            serde_json::from_str(r#"{"outputSeparator": " ; ", "retry": {"maxAttempts": 3}}"#)
                .unwrap();
        assert_eq!(settings.output_separator, " ; ");
        assert_eq!(settings.output_directory, "results");
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.recheckable.len(), 3);
    }

    #[test]
    fn load_or_init_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let first = RunSettings::load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(first, RunSettings::default());

        let mut edited = first.clone();
        edited.output_directory = "hits".into();
        edited.save(&path).unwrap();

        let second = RunSettings::load_or_init(&path).unwrap();
        assert_eq!(second.output_directory, "hits");
    }

    #[test]
    fn zero_attempts_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"retry": {"maxAttempts": 0}}"#).unwrap();
        let err = RunSettings::load(&path).unwrap_err();
        assert!(matches!(err, SieveError::Config(_)));
    }

    #[test]
    fn retry_policy_membership_is_case_insensitive() {
        let policy = RetryPolicy::default();
        assert!(policy.is_breaking(&BotStatus::parse("TOCHECK")));
        assert!(policy.is_breaking(&BotStatus::Failure));
        assert!(!policy.is_breaking(&BotStatus::Success));
        assert!(!policy.is_breaking(&BotStatus::Custom("free".into())));
        assert!(policy.is_recheckable(&BotStatus::Ban));
        assert!(!policy.is_recheckable(&BotStatus::ToCheck));
    }
}

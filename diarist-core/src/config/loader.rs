//! Configuration loading and management

use super::schema::{BackgroundConfig, Config};
use super::validate::validate_config;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Default configuration file, resolved against the working directory
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Configuration loader
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new config loader reading `config.yaml` from the working directory
    pub fn new() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }

    /// Create a new config loader with a custom config file
    pub fn with_file<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    /// Load configuration from file and environment
    pub fn load(&self) -> crate::Result<Config> {
        let mut merged = serde_json::to_value(Config::default())?;

        if self.config_path.exists() {
            let content = std::fs::read_to_string(&self.config_path)?;
            let file_value = self.parse_file(&content)?;
            if !file_value.is_null() {
                merge_values(&mut merged, file_value);
            }
        }

        apply_alias_overrides(&mut merged);
        apply_path_overrides(&mut merged);

        let config: Config = serde_json::from_value(merged)?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Save configuration to file, in the format its extension names
    pub fn save(&self, config: &Config) -> crate::Result<()> {
        self.write(config)
    }

    /// Replace only the `background` section of the config file.
    ///
    /// Everything else is kept as the file has it, so values that came from
    /// the environment (API keys in particular) are never written out.
    pub fn save_background(&self, background: &BackgroundConfig) -> crate::Result<()> {
        let mut file_value = if self.config_path.exists() {
            let content = std::fs::read_to_string(&self.config_path)?;
            self.parse_file(&content)?
        } else {
            Value::Null
        };
        if file_value.is_null() {
            file_value = Value::Object(Map::new());
        }
        let Some(map) = file_value.as_object_mut() else {
            return Err(crate::Error::Config(format!(
                "{} does not hold a mapping",
                self.config_path.display()
            )));
        };
        map.insert("background".to_string(), serde_json::to_value(background)?);
        self.write(&file_value)
    }

    fn write<T: Serialize>(&self, value: &T) -> crate::Result<()> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = if self.is_json() {
            serde_json::to_string_pretty(value)?
        } else {
            serde_yaml::to_string(value)?
        };
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn is_json(&self) -> bool {
        self.config_path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    }

    fn parse_file(&self, content: &str) -> crate::Result<Value> {
        let value = if self.is_json() {
            serde_json::from_str(content)?
        } else {
            serde_yaml::from_str::<Value>(content).map_err(|e| {
                crate::Error::Config(format!(
                    "failed to parse {}: {}",
                    self.config_path.display(),
                    e
                ))
            })?
        };
        Ok(value)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if let Some(existing) = base_map.get_mut(&key) {
                    merge_values(existing, value);
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value;
        }
    }
}

fn parse_env_value(raw: &str) -> Value {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return v;
    }
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(v) = raw.parse::<i64>() {
        return Value::Number(v.into());
    }
    if let Ok(v) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(v) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

fn set_path_value(root: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return;
    };

    let mut current = root;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Some(map) = current.as_object_mut() {
        map.insert(last.clone(), value);
    }
}

fn apply_alias_overrides(config: &mut Value) {
    // Later entries win.
    let aliases = [
        ("OPENAI_API_KEY", "llm.api_key"),
        ("OPENROUTER_API_KEY", "llm.api_key"),
        ("DIARIST_API_KEY", "llm.api_key"),
        ("DIARIST_API_BASE", "llm.api_base"),
        ("DIARIST_MODEL", "llm.model"),
    ];

    for (env_key, target_path) in aliases {
        if let Ok(value) = std::env::var(env_key) {
            if value.trim().is_empty() {
                continue;
            }
            let path: Vec<String> = target_path.split('.').map(ToString::to_string).collect();
            set_path_value(config, &path, Value::String(value));
        }
    }
}

fn apply_path_overrides(config: &mut Value) {
    const PREFIX: &str = "DIARIST__";
    for (key, value) in std::env::vars() {
        let Some(suffix) = key.strip_prefix(PREFIX) else {
            continue;
        };
        let segments: Vec<String> = suffix
            .split("__")
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_lowercase())
            .collect();
        if segments.is_empty() {
            continue;
        }
        // Secrets and free text stay strings even when they look like numbers.
        let parsed = if segments.last().is_some_and(|s| s == "api_key") {
            Value::String(value)
        } else {
            parse_env_value(&value)
        };
        set_path_value(config, &segments, parsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::{Mutex, MutexGuard};
    use tempfile::TempDir;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    struct EnvVarGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = std::env::var(key).ok();
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe { std::env::set_var(key, value) };
            Self {
                key: key.to_string(),
                original,
            }
        }

        fn unset(key: &str) -> Self {
            let original = std::env::var(key).ok();
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe { std::env::remove_var(key) };
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.original {
                // SAFETY: tests serialize env mutations with ENV_LOCK.
                unsafe { std::env::set_var(&self.key, value) };
            } else {
                // SAFETY: tests serialize env mutations with ENV_LOCK.
                unsafe { std::env::remove_var(&self.key) };
            }
        }
    }

    fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn clear_aliases() -> Vec<EnvVarGuard> {
        [
            "OPENAI_API_KEY",
            "OPENROUTER_API_KEY",
            "DIARIST_API_KEY",
            "DIARIST_API_BASE",
            "DIARIST_MODEL",
        ]
        .iter()
        .map(|key| EnvVarGuard::unset(key))
        .collect()
    }

    #[test]
    fn test_load_default_config_when_file_missing() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_file(temp_dir.path().join("config.yaml"));
        let config = loader.load().unwrap();

        assert_eq!(config.diary.min_message_length, 10);
        assert_eq!(config.diary.context_window, 50);
        assert_eq!(config.run.quick_per_year, 10);
        assert_eq!(config.output.progress_file, "progress.json");
    }

    #[test]
    fn test_load_yaml_file() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
llm:
  model: grok-test
  api_base: http://localhost:9999/v1
  api_key: test-key
  temperature: 0.5
diary:
  min_message_length: 4
background:
  text: Backend developer
  by_year:
    "2023": Learned Rust
"#,
        )
        .unwrap();

        let config = ConfigLoader::with_file(&path).load().unwrap();
        assert_eq!(config.llm.model, "grok-test");
        assert_eq!(config.llm.api_key, "test-key");
        assert!((config.llm.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.diary.min_message_length, 4);
        // untouched fields keep defaults
        assert_eq!(config.diary.max_message_chars, 500);
        assert_eq!(config.background.by_year.get("2023").unwrap(), "Learned Rust");
    }

    #[test]
    fn test_save_and_load_json_config() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_file(temp_dir.path().join("diarist.json"));

        let mut config = Config::default();
        config.llm.model = "test-model".to_string();

        loader.save(&config).unwrap();
        let loaded = loader.load().unwrap();

        assert_eq!(loaded.llm.model, "test-model");
    }

    #[test]
    fn test_save_and_load_yaml_config() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_file(temp_dir.path().join("nested").join("config.yaml"));

        let mut config = Config::default();
        config
            .background
            .by_year
            .insert("2022".to_string(), "Started a PhD".to_string());
        loader.save(&config).unwrap();

        let loaded = loader.load().unwrap();
        assert_eq!(loaded.background.by_year.get("2022").unwrap(), "Started a PhD");
    }

    #[test]
    fn test_save_background_keeps_env_values_out_of_the_file() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let _key_guard = EnvVarGuard::set("OPENAI_API_KEY", "sk-secret-from-env");
        let _model_guard = EnvVarGuard::set("DIARIST__LLM__MODEL", "env-model");

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "llm:\n  model: file-model\n  api_base: http://localhost:9999/v1\ndiary:\n  min_message_length: 4\n",
        )
        .unwrap();
        let loader = ConfigLoader::with_file(&path);
        let loaded = loader.load().unwrap();
        assert_eq!(loaded.llm.api_key, "sk-secret-from-env");

        let mut background = BackgroundConfig::default();
        background.text = "Grew up by the sea".to_string();
        background
            .by_year
            .insert("2023".to_string(), "Moved to Berlin".to_string());
        loader.save_background(&background).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("sk-secret-from-env"));
        assert!(!written.contains("env-model"));
        assert!(!written.contains("api_key"));
        assert!(written.contains("file-model"));

        let reloaded = loader.load().unwrap();
        assert_eq!(reloaded.background, background);
        assert_eq!(reloaded.diary.min_message_length, 4);
    }

    #[test]
    fn test_save_background_creates_missing_file() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_file(temp_dir.path().join("diarist.json"));

        let mut background = BackgroundConfig::default();
        background
            .by_year
            .insert("2022".to_string(), "Started a PhD".to_string());
        loader.save_background(&background).unwrap();

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(loader.config_path()).unwrap()).unwrap();
        assert_eq!(written.as_object().unwrap().len(), 1);
        assert_eq!(written["background"]["by_year"]["2022"], "Started a PhD");
    }

    #[test]
    fn test_load_applies_alias_env_overrides() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let _key_guard = EnvVarGuard::set("OPENAI_API_KEY", "sk-openai-from-env");
        let _base_guard = EnvVarGuard::set("DIARIST_API_BASE", "http://127.0.0.1:4000");

        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_file(temp_dir.path().join("config.yaml"));
        let config = loader.load().unwrap();

        assert_eq!(config.llm.api_key, "sk-openai-from-env");
        assert_eq!(config.llm.api_base, "http://127.0.0.1:4000");
    }

    #[test]
    fn test_load_applies_path_env_overrides() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let _model_guard = EnvVarGuard::set("DIARIST__LLM__MODEL", "openai/gpt-4o");
        let _temp_guard = EnvVarGuard::set("DIARIST__LLM__TEMPERATURE", "0.9");
        let _quick_guard = EnvVarGuard::set("DIARIST__RUN__QUICK_PER_YEAR", "42");
        let _fail_guard = EnvVarGuard::set("DIARIST__RUN__FAIL_FAST", "true");
        let _key_guard = EnvVarGuard::set("DIARIST__LLM__API_KEY", "12345");

        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_file(temp_dir.path().join("config.yaml"));
        let config = loader.load().unwrap();

        assert_eq!(config.llm.model, "openai/gpt-4o");
        assert!((config.llm.temperature - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.run.quick_per_year, 42);
        assert!(config.run.fail_fast);
        assert_eq!(config.llm.api_key, "12345");
    }

    #[test]
    fn test_path_env_overrides_alias_and_file() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let _alias_guard = EnvVarGuard::set("OPENAI_API_KEY", "sk-openai-alias");
        let _path_guard = EnvVarGuard::set("DIARIST__LLM__API_KEY", "sk-path-override");

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        std::fs::write(&config_path, r#"{"llm":{"api_key":"sk-file"}}"#).unwrap();

        let config = ConfigLoader::with_file(&config_path).load().unwrap();
        assert_eq!(config.llm.api_key, "sk-path-override");
    }

    #[test]
    fn test_validation_rejects_invalid_temperature() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let _temp_guard = EnvVarGuard::set("DIARIST__LLM__TEMPERATURE", "2.5");

        let temp_dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_file(temp_dir.path().join("config.yaml"));
        let err = loader.load().unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let _lock = lock_env();
        let _aliases = clear_aliases();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(&path, "llm: [unclosed").unwrap();

        let err = ConfigLoader::with_file(&path).load().unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}

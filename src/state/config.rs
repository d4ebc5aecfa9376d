//! Project configuration module
//!
//! Defines the typed configuration record attached to every project and
//! template, plus the override record used at instantiation time.
//!
//! For application-level configuration (server settings, persistence settings,
//! execution settings), see `config`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Configuration record of a project
///
/// Recognized options are typed fields; any other key found in a stored or
/// imported document is preserved in `extra` and written back untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    /// Target hosting identifier (e.g. "vercel", "fly", "kubernetes")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Command used to build the project
    #[serde(default)]
    pub build_command: String,
    /// Command used to install dependencies
    #[serde(default)]
    pub install_command: String,
    /// Build output directory
    #[serde(default)]
    pub output_directory: String,
    /// Environment variables passed to every command of the project
    #[serde(default)]
    pub environment_variables: HashMap<String, String>,
    /// Disabled projects cannot be run
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Unrecognized keys, preserved but not interpreted
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            platform: None,
            build_command: String::new(),
            install_command: String::new(),
            output_directory: String::new(),
            environment_variables: HashMap::new(),
            enabled: true,
            extra: Map::new(),
        }
    }
}

impl ProjectConfig {
    /// Merge overrides on top of this configuration
    ///
    /// The override wins on every key it sets. Nested members (the
    /// environment-variable map and individual extra keys) are replaced
    /// wholesale, never merged.
    pub fn merged_with(&self, overrides: &ConfigOverrides) -> ProjectConfig {
        let mut merged = self.clone();
        if let Some(platform) = &overrides.platform {
            merged.platform = Some(platform.clone());
        }
        if let Some(cmd) = &overrides.build_command {
            merged.build_command = cmd.clone();
        }
        if let Some(cmd) = &overrides.install_command {
            merged.install_command = cmd.clone();
        }
        if let Some(dir) = &overrides.output_directory {
            merged.output_directory = dir.clone();
        }
        if let Some(env) = &overrides.environment_variables {
            merged.environment_variables = env.clone();
        }
        if let Some(enabled) = overrides.enabled {
            merged.enabled = enabled;
        }
        for (key, value) in &overrides.extra {
            merged.extra.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// Partial configuration applied on top of a template's defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConfigOverrides {
    /// Replaces the platform
    #[serde(default)]
    pub platform: Option<String>,
    /// Replaces the build command
    #[serde(default)]
    pub build_command: Option<String>,
    /// Replaces the install command
    #[serde(default)]
    pub install_command: Option<String>,
    /// Replaces the output directory
    #[serde(default)]
    pub output_directory: Option<String>,
    /// Replaces the whole environment-variable map
    #[serde(default)]
    pub environment_variables: Option<HashMap<String, String>>,
    /// Replaces the enabled flag
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Extra keys, each replacing the template's value for that key
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> ProjectConfig {
        let mut env = HashMap::new();
        env.insert("NODE_ENV".to_string(), "production".to_string());
        env.insert("REGION".to_string(), "eu".to_string());
        ProjectConfig {
            platform: Some("vercel".to_string()),
            build_command: "npm run build".to_string(),
            install_command: "npm ci".to_string(),
            output_directory: "dist".to_string(),
            environment_variables: env,
            enabled: true,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_project_config_default() {
        let config = ProjectConfig::default();
        assert!(config.platform.is_none());
        assert!(config.build_command.is_empty());
        assert!(config.environment_variables.is_empty());
        assert!(config.enabled);
    }

    #[test]
    fn test_override_wins_on_collision() {
        let overrides = ConfigOverrides {
            platform: Some("netlify".to_string()),
            build_command: Some("pnpm build".to_string()),
            ..Default::default()
        };
        let merged = base().merged_with(&overrides);
        assert_eq!(merged.platform.as_deref(), Some("netlify"));
        assert_eq!(merged.build_command, "pnpm build");
        // Untouched keys keep the template value
        assert_eq!(merged.install_command, "npm ci");
        assert_eq!(merged.output_directory, "dist");
    }

    #[test]
    fn test_environment_map_replaced_wholesale() {
        let mut env = HashMap::new();
        env.insert("NODE_ENV".to_string(), "staging".to_string());
        let overrides = ConfigOverrides {
            environment_variables: Some(env),
            ..Default::default()
        };
        let merged = base().merged_with(&overrides);
        assert_eq!(merged.environment_variables.len(), 1);
        assert_eq!(merged.environment_variables["NODE_ENV"], "staging");
        assert!(!merged.environment_variables.contains_key("REGION"));
    }

    #[test]
    fn test_unknown_keys_are_preserved() {
        let raw = json!({
            "build_command": "make",
            "region": "us-east-1",
            "scaling": { "min": 1, "max": 3 }
        });
        let config: ProjectConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.build_command, "make");
        assert!(config.enabled);
        assert_eq!(config.extra["region"], json!("us-east-1"));

        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["scaling"]["max"], json!(3));
    }

    #[test]
    fn test_extra_member_replaced_not_merged() {
        let mut config = base();
        config
            .extra
            .insert("scaling".to_string(), json!({ "min": 1, "max": 3 }));
        let mut overrides = ConfigOverrides::default();
        overrides
            .extra
            .insert("scaling".to_string(), json!({ "max": 10 }));

        let merged = config.merged_with(&overrides);
        assert_eq!(merged.extra["scaling"], json!({ "max": 10 }));
    }
}

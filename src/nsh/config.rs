use crate::error::{NshError, Result};
use crate::value::{coerce, Value, ValueType};
use directories::ProjectDirs;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILENAME: &str = "nsh.conf";
pub const CONFIG_ENV: &str = "NSH_CONFIG";

/// A session variable the shell itself reads.
#[derive(Debug, Clone, Copy)]
pub struct VariableDef {
    pub name: &'static str,
    pub value_type: ValueType,
    pub default: &'static str,
    pub choices: &'static [&'static str],
    pub description: &'static str,
}

pub const VARIABLES: &[VariableDef] = &[
    VariableDef {
        name: "timeout",
        value_type: ValueType::Number,
        default: "10",
        choices: &[],
        description: "Seconds to wait for a synchronous call",
    },
    VariableDef {
        name: "tasks_blocking",
        value_type: ValueType::Boolean,
        default: "no",
        choices: &[],
        description: "Wait for submitted tasks before returning",
    },
    VariableDef {
        name: "autosave",
        value_type: ValueType::Boolean,
        default: "no",
        choices: &[],
        description: "Save entities right after set",
    },
    VariableDef {
        name: "prompt",
        value_type: ValueType::String,
        default: "{path}>",
        choices: &[],
        description: "Prompt template, {path} is the current namespace",
    },
    VariableDef {
        name: "debug",
        value_type: ValueType::Boolean,
        default: "no",
        choices: &[],
        description: "Log dispatch details",
    },
    VariableDef {
        name: "output_format",
        value_type: ValueType::Enum,
        default: "ascii",
        choices: &["ascii", "json"],
        description: "How results are rendered",
    },
];

pub fn definition(name: &str) -> Option<&'static VariableDef> {
    VARIABLES.iter().find(|def| def.name == name)
}

/// Session variables. Names without a definition hold plain strings and are
/// available to `${name}` expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct Variables {
    values: BTreeMap<String, Value>,
}

impl Default for Variables {
    fn default() -> Self {
        let values = VARIABLES
            .iter()
            .filter_map(|def| {
                coerce(def.default, def.value_type)
                    .ok()
                    .map(|value| (def.name.to_string(), value))
            })
            .collect();
        Self { values }
    }
}

impl Variables {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Boolean variables; anything unset or non-boolean reads as off.
    pub fn flag(&self, name: &str) -> bool {
        self.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn number(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_number)
    }

    /// Text form, as used by `${name}`.
    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name).map(Value::to_string)
    }

    /// Coerce `raw` to the variable's type and store it. The old value is
    /// kept on any failure.
    pub fn set(&mut self, name: &str, raw: &str) -> Result<()> {
        let value = match definition(name) {
            None => Value::String(raw.to_string()),
            Some(def) => {
                let value = coerce(raw, def.value_type)?;
                if !def.choices.is_empty() && !def.choices.contains(&value.to_string().as_str()) {
                    return Err(NshError::InvalidChoice {
                        name: name.to_string(),
                        value: raw.to_string(),
                        allowed: def.choices.iter().map(|c| c.to_string()).collect(),
                    });
                }
                if name == "timeout" && value.as_number().map_or(true, |n| n <= 0) {
                    return Err(NshError::Command("timeout must be a positive number".to_string()));
                }
                value
            }
        };
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Load variables from `path`, or return defaults if it does not exist.
    /// Lines that fail to parse are skipped with a warning.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut variables = Self::default();
        if !path.exists() {
            return Ok(variables);
        }

        let content = fs::read_to_string(path)?;
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name, value)) = line.split_once('=') else {
                tracing::warn!(path = %path.display(), line = number + 1, "expected key=value");
                continue;
            };
            if let Err(err) = variables.set(name.trim(), value.trim()) {
                tracing::warn!(path = %path.display(), line = number + 1, %err, "variable skipped");
            }
        }
        Ok(variables)
    }

    /// Write every variable as `key=value`, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut content = String::from("# nsh session variables\n");
        for (name, value) in self.iter() {
            content.push_str(&format!("{}={}\n", name, value));
        }
        fs::write(path, content)?;
        Ok(())
    }
}

/// `NSH_CONFIG`, else `nsh.conf` in the platform config directory.
pub fn default_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    ProjectDirs::from("", "", "nsh").map(|dirs| dirs.config_dir().join(CONFIG_FILENAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_typed() {
        let vars = Variables::default();
        assert_eq!(vars.number("timeout"), Some(10));
        assert!(!vars.flag("tasks_blocking"));
        assert_eq!(vars.text("output_format").as_deref(), Some("ascii"));
        assert_eq!(vars.text("prompt").as_deref(), Some("{path}>"));
    }

    #[test]
    fn bad_value_leaves_variable_unchanged() {
        let mut vars = Variables::default();
        let err = vars.set("timeout", "abc").unwrap_err();
        assert!(matches!(err, NshError::TypeCoercion { .. }));
        assert_eq!(vars.number("timeout"), Some(10));

        assert!(vars.set("timeout", "0").is_err());
        assert!(vars.set("output_format", "yaml").is_err());
        assert_eq!(vars.text("output_format").as_deref(), Some("ascii"));
    }

    #[test]
    fn unknown_names_hold_strings() {
        let mut vars = Variables::default();
        vars.set("user", "root").unwrap();
        assert_eq!(vars.get("user"), Some(&Value::String("root".into())));
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let vars = Variables::load(dir.path().join("none.conf")).unwrap();
        assert_eq!(vars, Variables::default());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("nsh.conf");

        let mut vars = Variables::default();
        vars.set("timeout", "30").unwrap();
        vars.set("tasks_blocking", "true").unwrap();
        vars.set("greeting", "hello world").unwrap();
        vars.save(&path).unwrap();

        let loaded = Variables::load(&path).unwrap();
        assert_eq!(loaded, vars);
        assert_eq!(loaded.text("tasks_blocking").as_deref(), Some("yes"));
    }

    #[test]
    fn load_skips_bad_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nsh.conf");
        fs::write(&path, "# comment\n\ntimeout=abc\nautosave = yes\nnonsense\n").unwrap();

        let vars = Variables::load(&path).unwrap();
        assert_eq!(vars.number("timeout"), Some(10));
        assert!(vars.flag("autosave"));
    }
}

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use toml::Value;

use crate::error::{Error, Result};
use crate::hashsum::HashAlgo;
use crate::inventory::DupsOptions;

#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    /// Config used when no `--config` file is given.
    pub fn empty() -> Self {
        Self {
            path: PathBuf::from("<default>"),
            value: Value::Table(Default::default()),
        }
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            let tbl = cur.as_table()?;
            cur = tbl.get(seg)?;
        }
        Some(cur)
    }

    pub fn tool_config(&self) -> Result<ToolConfig> {
        self.value.clone().try_into().map_err(|e| {
            Error::config(format!("invalid config {}: {e}", self.path.display()))
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub encode: EncodeConfig,
    pub hash: HashConfig,
    pub dups: DupsOptions,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodeConfig {
    /// Fail on malformed partition entries instead of skipping them.
    pub strict: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HashConfig {
    pub algo: HashAlgo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: Option<String>,
    pub format: LogFormat,
}

fn merge_values(base: &mut Value, child: Value) {
    match (base, child) {
        (Value::Table(base_tbl), Value::Table(child_tbl)) => {
            for (k, v) in child_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (base_slot, child_val) => {
            *base_slot = child_val;
        }
    }
}

fn resolve_ref_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

fn parse_imports(path: &Path, table: &toml::value::Table) -> Result<Vec<String>> {
    let Some(arr) = table.get("imports").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(Error::config(format!(
                "invalid imports entry in {} (expected string)",
                path.display()
            )));
        };
        let s = s.trim();
        if !s.is_empty() {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

fn load_value_inner(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::config(format!(
            "config import cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::io(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::config(format!("TOML parse error in {}: {e}", path.display())))?;
    let Some(tbl) = value.as_table_mut() else {
        return Err(Error::config(format!(
            "config root in {} must be a table",
            path.display()
        )));
    };

    // extends < imports < the file itself
    let mut out = Value::Table(Default::default());
    if let Some(ext) = tbl.remove("extends") {
        let Some(ext) = ext.as_str() else {
            return Err(Error::config(format!(
                "invalid extends in {} (expected string)",
                path.display()
            )));
        };
        out = load_value_inner(&resolve_ref_path(path, ext), stack)?;
    }
    for imp in parse_imports(path, tbl)? {
        let loaded = load_value_inner(&resolve_ref_path(path, &imp), stack)?;
        merge_values(&mut out, loaded);
    }
    tbl.remove("imports");

    merge_values(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value_inner(path, &mut stack)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

fn parse_overrides(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for item in raw {
        let trimmed = item.trim();
        let Some((k, v)) = trimmed.split_once('=') else {
            return Err(Error::config(format!(
                "invalid --set value '{}'; expected KEY=VALUE",
                item
            )));
        };
        let key = k.trim();
        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(Error::config(format!(
                "invalid --set value '{}'; key is empty",
                item
            )));
        }
        out.insert(key.to_string(), v.trim().to_string());
    }
    Ok(out)
}

/// TOML literal when it parses as one (`true`, `3`, `[".pdf"]`), else a string.
fn override_value(raw: &str) -> Value {
    toml::from_str::<toml::Table>(&format!("v = {raw}"))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

fn set_path(root: &mut Value, key: &str, value: Value) -> Result<()> {
    let segs: Vec<&str> = key.split('.').collect();
    let (last, parents) = segs
        .split_last()
        .ok_or_else(|| Error::config("empty override key"))?;
    let mut cur = root;
    for seg in parents {
        let Some(tbl) = cur.as_table_mut() else {
            return Err(Error::config(format!(
                "cannot set '{key}': '{seg}' is inside a non-table value"
            )));
        };
        cur = tbl
            .entry(seg.to_string())
            .or_insert_with(|| Value::Table(Default::default()));
    }
    let Some(tbl) = cur.as_table_mut() else {
        return Err(Error::config(format!(
            "cannot set '{key}': parent is not a table"
        )));
    };
    tbl.insert(last.to_string(), value);
    Ok(())
}

/// Applies `--set section.key=value` overrides on top of the loaded config.
pub fn apply_cli_overrides(doc: &mut ConfigDoc, raw_overrides: &[String]) -> Result<()> {
    for (key, raw) in parse_overrides(raw_overrides)? {
        set_path(&mut doc.value, &key, override_value(&raw))?;
    }
    Ok(())
}

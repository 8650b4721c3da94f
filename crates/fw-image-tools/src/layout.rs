//! Typed view of the JSON partition layout document.
//!
//! The on-disk layout is a JSON list of objects. One entry carries `unit`, one
//! carries `partitions`; a single object holding both keys is accepted too.
//! Everything is converted into [`Document`] eagerly so the encoder never
//! looks at untyped values.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::log_sanitize::sanitize_log_line;

/// Flag marking a partition that has no image payload.
pub const NO_IMAGE_FLAG: &str = "no-image";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Byte,
    KiB,
    /// 512 KiB, only reachable through the legacy `512K` spelling.
    HalfMiB,
    MiB,
    GiB,
    Sector,
}

impl Unit {
    /// Case-insensitive lookup in the fixed unit table.
    ///
    /// The `1M`, `512K`, `1` and `1Sector` spellings are the older layout
    /// files' unit names and resolve to the same multipliers.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "B" | "BYTE" | "1" => Some(Unit::Byte),
            "K" | "KB" | "KIB" | "1K" => Some(Unit::KiB),
            "512K" => Some(Unit::HalfMiB),
            "M" | "MB" | "MIB" | "1M" => Some(Unit::MiB),
            "G" | "GB" | "GIB" => Some(Unit::GiB),
            "SECTOR" | "1SECTOR" => Some(Unit::Sector),
            _ => None,
        }
    }

    pub fn multiplier(self) -> u64 {
        match self {
            Unit::Byte => 1,
            Unit::KiB => 1024,
            Unit::HalfMiB => 512 * 1024,
            Unit::MiB => 1024 * 1024,
            Unit::GiB => 1024 * 1024 * 1024,
            Unit::Sector => 512,
        }
    }
}

/// Per-entry error policy of the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Skip malformed entries and read bad sizes as 0, with a warning.
    #[default]
    Lenient,
    /// Fail on the first malformed entry or bad size.
    Strict,
}

impl Strictness {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            Strictness::Strict
        } else {
            Strictness::Lenient
        }
    }
}

/// `flags` as written in the layout. A text value marks "no image" when it
/// contains the flag anywhere; a list only when one element equals it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Flags {
    #[default]
    None,
    Text(String),
    List(Vec<String>),
}

impl Flags {
    pub fn has(&self, flag: &str) -> bool {
        match self {
            Flags::None => false,
            Flags::Text(s) => s.contains(flag),
            Flags::List(items) => items.iter().any(|f| f == flag),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionSpec {
    pub name: String,
    pub size_units: u64,
    pub flags: Flags,
}

impl PartitionSpec {
    pub fn new(name: impl Into<String>, size_units: u64) -> Self {
        Self {
            name: name.into(),
            size_units,
            flags: Flags::None,
        }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        let mut items = match std::mem::take(&mut self.flags) {
            Flags::None => Vec::new(),
            Flags::Text(s) => vec![s],
            Flags::List(items) => items,
        };
        items.push(flag.into());
        self.flags = Flags::List(items);
        self
    }

    pub fn has_image(&self) -> bool {
        !self.flags.has(NO_IMAGE_FLAG)
    }

    /// Size in bytes for the given unit, `None` on overflow.
    pub fn size_bytes(&self, unit: Unit) -> Option<u64> {
        self.size_units.checked_mul(unit.multiplier())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub unit: Unit,
    pub partitions: Vec<PartitionSpec>,
    /// Problems tolerated while loading in lenient mode.
    pub warnings: Vec<String>,
}

impl Document {
    pub fn new(unit: Unit, partitions: Vec<PartitionSpec>) -> Self {
        Self {
            unit,
            partitions,
            warnings: Vec::new(),
        }
    }

    pub fn load(path: &Path, mode: Strictness) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("failed to read layout {}: {e}", path.display())))?;
        Self::from_json_str(&data, mode).map_err(|e| match e {
            Error::InputFormat(m) => Error::InputFormat(format!("{}: {m}", path.display())),
            other => other,
        })
    }

    pub fn from_json_str(data: &str, mode: Strictness) -> Result<Self> {
        let value: Value = serde_json::from_str(data)?;
        Self::from_value(value, mode)
    }

    pub fn from_value(value: Value, mode: Strictness) -> Result<Self> {
        let (partitions, unit) = locate_fields(value)?;

        let entries = match partitions {
            None | Some(Value::Null) => {
                return Err(Error::MissingPartitions(
                    "'partitions' key not found".into(),
                ));
            }
            Some(Value::Array(entries)) => entries,
            Some(_) => {
                return Err(Error::MissingPartitions(
                    "'partitions' value must be a list".into(),
                ));
            }
        };

        let unit = match unit {
            None => return Err(Error::InvalidUnit("'unit' key not found".into())),
            Some(Value::String(s)) => {
                Unit::parse(&s).ok_or_else(|| Error::InvalidUnit(format!("unknown unit '{s}'")))?
            }
            Some(other) => {
                return Err(Error::InvalidUnit(format!(
                    "expected a string, got {other}"
                )));
            }
        };

        let mut loader = Loader {
            mode,
            warnings: Vec::new(),
        };
        let mut partitions = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if let Some(spec) = loader.entry(index, entry)? {
                debug!(index, name = %spec.name, size = spec.size_units, "loaded partition");
                partitions.push(spec);
            }
        }

        if partitions.is_empty() {
            return Err(Error::MissingPartitions(
                "no usable partition entries".into(),
            ));
        }

        Ok(Self {
            unit,
            partitions,
            warnings: loader.warnings,
        })
    }

    pub fn find(&self, name: &str) -> Option<&PartitionSpec> {
        self.partitions.iter().find(|p| p.name == name)
    }
}

fn locate_fields(value: Value) -> Result<(Option<Value>, Option<Value>)> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(Error::InputFormat("expected a non-empty list".into()));
            }
            let mut partitions = None;
            let mut unit = None;
            for item in items {
                let Value::Object(mut obj) = item else {
                    continue;
                };
                if let Some(p) = obj.remove("partitions") {
                    partitions = Some(p);
                }
                if let Some(u) = obj.remove("unit") {
                    unit = Some(u);
                }
            }
            Ok((partitions, unit))
        }
        Value::Object(mut obj) => Ok((obj.remove("partitions"), obj.remove("unit"))),
        other => Err(Error::InputFormat(format!(
            "expected a list of objects, got {}",
            type_name(&other)
        ))),
    }
}

struct Loader {
    mode: Strictness,
    warnings: Vec<String>,
}

impl Loader {
    // Strict mode turns the issue into an error, lenient mode records it.
    fn tolerate(&mut self, err: Error) -> Result<()> {
        if self.mode == Strictness::Strict {
            return Err(err);
        }
        let line = sanitize_log_line(&err.to_string());
        warn!("{line}");
        self.warnings.push(line);
        Ok(())
    }

    fn entry(&mut self, index: usize, entry: &Value) -> Result<Option<PartitionSpec>> {
        let Value::Object(obj) = entry else {
            self.tolerate(Error::MalformedPartitionEntry {
                index,
                reason: format!("expected an object, got {}", type_name(entry)),
            })?;
            return Ok(None);
        };

        let name = match obj.get("name") {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                self.tolerate(Error::MalformedPartitionEntry {
                    index,
                    reason: format!("'name' must be a string, got {}", type_name(other)),
                })?;
                return Ok(None);
            }
        };

        let size_units = match obj.get("size") {
            None => 0,
            Some(raw) => match parse_size(raw) {
                Some(v) => v,
                None => {
                    self.tolerate(Error::SizeParse {
                        name: name.clone(),
                        value: display_value(raw),
                    })?;
                    0
                }
            },
        };

        let flags = self.flags(index, obj)?;

        Ok(Some(PartitionSpec {
            name,
            size_units,
            flags,
        }))
    }

    fn flags(&mut self, index: usize, obj: &Map<String, Value>) -> Result<Flags> {
        match obj.get("flags") {
            None | Some(Value::Null) => Ok(Flags::None),
            Some(Value::String(s)) => Ok(Flags::Text(s.clone())),
            Some(Value::Array(items)) if items.iter().all(Value::is_string) => Ok(Flags::List(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(ToOwned::to_owned))
                    .collect(),
            )),
            Some(other) => {
                self.tolerate(Error::MalformedPartitionEntry {
                    index,
                    reason: format!("'flags' must be a string, got {}", type_name(other)),
                })?;
                Ok(Flags::None)
            }
        }
    }
}

/// Accepts a non-negative JSON integer or decimal text.
fn parse_size(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

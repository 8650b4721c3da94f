use std::fmt;

use crate::error::{Error, Result};
use crate::layout::Document;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Size of the first partition called `name`, in bytes.
///
/// Returns `Ok(None)` when no partition matches or its size is zero.
pub fn partition_size(doc: &Document, name: &str) -> Result<Option<u64>> {
    let Some(spec) = doc.find(name) else {
        return Ok(None);
    };
    let bytes = spec.size_bytes(doc.unit).ok_or_else(|| Error::SizeParse {
        name: spec.name.clone(),
        value: format!("{} units overflow u64 bytes", spec.size_units),
    })?;
    Ok((bytes > 0).then_some(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanSize {
    pub value: u64,
    pub suffix: &'static str,
}

impl HumanSize {
    /// Largest power-of-1024 unit that divides `bytes` exactly.
    pub fn from_bytes(bytes: u64) -> Self {
        let (div, suffix) = if bytes == 0 {
            (1, "")
        } else if bytes % GIB == 0 {
            (GIB, "G")
        } else if bytes % MIB == 0 {
            (MIB, "M")
        } else if bytes % KIB == 0 {
            (KIB, "K")
        } else {
            (1, "")
        };
        Self {
            value: bytes / div,
            suffix,
        }
    }
}

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.suffix)
    }
}

//! File inventory reports over build trees: duplicate files and
//! source-vs-reference differences by file name.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::fsutil::{normalize_rel, path_to_rel_string};
use crate::hashsum::{HashAlgo, file_digest};

fn default_extensions() -> Vec<String> {
    vec![".pdf".into()]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DupsOptions {
    /// Lowercase suffixes to match; `""` matches files without an extension.
    pub extensions: Vec<String>,
    /// Consider every file and ignore `extensions`.
    pub all_files: bool,
    /// Directories relative to the scan root to prune. Entries may be
    /// comma-separated lists.
    pub exclude_dirs: Vec<String>,
}

impl Default for DupsOptions {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            all_files: false,
            exclude_dirs: Vec::new(),
        }
    }
}

impl DupsOptions {
    fn wants(&self, file_name: &str) -> bool {
        if self.all_files {
            return true;
        }
        let lower = file_name.to_lowercase();
        self.extensions.iter().any(|ext| {
            let ext = ext.to_lowercase();
            if ext.is_empty() {
                Path::new(&lower).extension().is_none()
            } else {
                lower.ends_with(&ext)
            }
        })
    }

    fn excluded_set(&self) -> BTreeSet<String> {
        self.exclude_dirs
            .iter()
            .flat_map(|item| item.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| rel_key(Path::new(s)))
            .collect()
    }
}

fn rel_key(rel: &Path) -> String {
    path_to_rel_string(&normalize_rel(rel)).to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub file_name: String,
    /// SHA-256 of the shared content.
    pub digest: String,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct DuplicateReport {
    pub files_scanned: usize,
    pub groups: Vec<DuplicateGroup>,
}

/// Finds files that share both their file name and their content.
pub fn find_duplicates(root: &Path, opts: &DupsOptions) -> Result<DuplicateReport> {
    if !root.is_dir() {
        return Err(Error::io(format!(
            "directory '{}' does not exist or is not a directory",
            root.display()
        )));
    }

    let excluded = opts.excluded_set();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let keep = e
                .path()
                .strip_prefix(root)
                .map(|rel| !excluded.contains(&rel_key(rel)))
                .unwrap_or(true);
            if !keep {
                debug!(dir = %e.path().display(), "excluded");
            }
            keep
        });

    let mut by_name = BTreeMap::<String, Vec<PathBuf>>::new();
    let mut files_scanned = 0usize;
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !opts.wants(&name) {
            continue;
        }
        files_scanned += 1;
        by_name.entry(name).or_default().push(entry.into_path());
    }

    let mut groups = Vec::new();
    for (file_name, paths) in by_name {
        if paths.len() < 2 {
            continue;
        }
        let mut by_digest = BTreeMap::<String, Vec<PathBuf>>::new();
        for p in paths {
            match file_digest(&p, HashAlgo::Sha256) {
                Ok(d) => by_digest.entry(d).or_default().push(p),
                Err(e) => warn!("skipping unreadable file: {e}"),
            }
        }
        for (digest, paths) in by_digest {
            if paths.len() > 1 {
                groups.push(DuplicateGroup {
                    file_name: file_name.clone(),
                    digest,
                    paths,
                });
            }
        }
    }

    Ok(DuplicateReport {
        files_scanned,
        groups,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonFile {
    pub file_name: String,
    pub source: String,
    pub reference: String,
}

#[derive(Debug, Clone, Default)]
pub struct DirDiff {
    /// Relative source paths whose file name never appears in the reference.
    pub unique: Vec<String>,
    pub common: Vec<CommonFile>,
}

/// Compares two trees by file name. Where a name occurs more than once, the
/// lexicographically first relative path represents it.
pub fn diff_dirs(source: &Path, reference: &Path) -> Result<DirDiff> {
    let src = names_to_paths(source, "source")?;
    let refs = names_to_paths(reference, "reference")?;

    let mut unique: Vec<String> = src
        .iter()
        .filter(|(name, _)| !refs.contains_key(*name))
        .map(|(_, rel)| rel.clone())
        .collect();
    unique.sort();

    let common = src
        .iter()
        .filter_map(|(name, rel)| {
            refs.get(name).map(|other| CommonFile {
                file_name: name.clone(),
                source: rel.clone(),
                reference: other.clone(),
            })
        })
        .collect();

    Ok(DirDiff { unique, common })
}

/// Sorted relative paths of every regular file under `dir`.
pub fn relative_files(dir: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::msg(format!("strip_prefix failed: {e}")))?;
        out.push(path_to_rel_string(rel));
    }
    out.sort();
    Ok(out)
}

fn names_to_paths(dir: &Path, role: &str) -> Result<BTreeMap<String, String>> {
    if !dir.is_dir() {
        return Err(Error::io(format!(
            "{role} directory '{}' does not exist or is not a directory",
            dir.display()
        )));
    }
    let mut out = BTreeMap::new();
    for rel in relative_files(dir)? {
        let name = rel.rsplit('/').next().unwrap_or(&rel).to_string();
        out.entry(name).or_insert(rel);
    }
    Ok(out)
}

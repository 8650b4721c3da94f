use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use sha2::Digest;
use tracing::info;

use crate::error::{Error, Result};
use crate::fsutil;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgo {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgo {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgo::Sha1 => "sha1",
            HashAlgo::Sha256 => "sha256",
            HashAlgo::Sha512 => "sha512",
        }
    }

    /// `sha1sum.txt`, `sha256sum.txt`, ...
    pub fn default_manifest_name(self) -> String {
        format!("{}sum.txt", self.name())
    }
}

impl fmt::Display for HashAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashAlgo::Sha1),
            "sha256" => Ok(HashAlgo::Sha256),
            "sha512" => Ok(HashAlgo::Sha512),
            other => Err(Error::config(format!(
                "unsupported hash algorithm '{other}' (expected sha1, sha256 or sha512)"
            ))),
        }
    }
}

/// Lowercase hex digest of a file.
pub fn file_digest(path: &Path, algo: HashAlgo) -> Result<String> {
    match algo {
        HashAlgo::Sha1 => digest_file::<sha1::Sha1>(path),
        HashAlgo::Sha256 => digest_file::<sha2::Sha256>(path),
        HashAlgo::Sha512 => digest_file::<sha2::Sha512>(path),
    }
}

fn digest_file<D: Digest>(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .map_err(|e| Error::io(format!("failed to open {}: {e}", path.display())))?;
    let mut hasher = D::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::io(format!("failed to read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLine {
    pub digest: String,
    pub file_name: String,
}

impl fmt::Display for ManifestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.digest, self.file_name)
    }
}

/// Digests every input. All inputs must exist before any is hashed.
pub fn manifest_lines(inputs: &[PathBuf], algo: HashAlgo) -> Result<Vec<ManifestLine>> {
    if let Some(missing) = inputs.iter().find(|p| !p.is_file()) {
        return Err(Error::io(format!("file not found: {}", missing.display())));
    }
    inputs
        .iter()
        .map(|p| {
            let file_name = p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string());
            Ok(ManifestLine {
                digest: file_digest(p, algo)?,
                file_name,
            })
        })
        .collect()
}

/// Writes `<hex> <basename>` lines for `inputs` to `out`.
pub fn write_manifest(inputs: &[PathBuf], algo: HashAlgo, out: &Path) -> Result<Vec<ManifestLine>> {
    let lines = manifest_lines(inputs, algo)?;
    let mut text = Vec::new();
    for line in &lines {
        writeln!(text, "{line}")?;
    }
    fsutil::write_atomic(out, &text)?;
    info!(algo = %algo, files = lines.len(), out = %out.display(), "wrote checksum manifest");
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_algorithm_names() {
        assert_eq!("SHA256".parse::<HashAlgo>().unwrap(), HashAlgo::Sha256);
        assert_eq!("sha1".parse::<HashAlgo>().unwrap(), HashAlgo::Sha1);
        assert!("md5".parse::<HashAlgo>().is_err());
        assert_eq!(HashAlgo::Sha512.default_manifest_name(), "sha512sum.txt");
    }

    #[test]
    fn known_digests_of_abc() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let p = tmp.path().join("abc.txt");
        fs::write(&p, b"abc").expect("write");
        assert_eq!(
            file_digest(&p, HashAlgo::Sha1).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            file_digest(&p, HashAlgo::Sha256).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(file_digest(&p, HashAlgo::Sha512).unwrap().starts_with("ddaf35a193617aba"));
    }
}

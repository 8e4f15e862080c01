//! Release archives: one tarball carrying a manifest plus artifacts.
//!
//! Layout inside the archive:
//!
//! - `compose.yml` — the manifest bytes, exactly as authored.
//! - `artifacts/<basename>` — zero or more artifact files. Every
//!   artifact whose contents parse as a flat key/value document
//!   contributes its keys to the variable bag used at render time;
//!   later artifacts override earlier ones.
//!
//! Archives are plain POSIX tar; a `.gz`/`.tgz` path (or gzip magic on
//! read) adds transparent compression.

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::constants::{ARCHIVE_ARTIFACTS_DIR, ARCHIVE_MANIFEST_MEMBER};
use crate::error::{Error, Result};
use crate::pod::template::{parse_var_document, VariableBag};

/// An unpacked release archive.
#[derive(Debug, Clone)]
pub struct ReleaseArchive {
    pub manifest: Vec<u8>,
    /// `(basename, contents)` in archive order.
    pub artifacts: Vec<(String, Vec<u8>)>,
}

impl ReleaseArchive {
    /// Variables contributed by the artifacts. Artifacts that do not
    /// parse as flat key/value documents contribute nothing; later
    /// artifacts override earlier ones.
    pub fn artifact_vars(&self) -> VariableBag {
        let mut bag = VariableBag::new();
        for (name, contents) in &self.artifacts {
            let Ok(text) = std::str::from_utf8(contents) else {
                continue;
            };
            match parse_var_document(text) {
                Ok(vars) => bag.extend(vars),
                Err(_) => debug!(artifact = %name, "artifact is not a key/value document"),
            }
        }
        bag
    }
}

/// True if the path looks like a release archive rather than a bare
/// manifest.
pub fn is_archive_path(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".tar") || name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

/// Packs a manifest and artifact files into `output`.
pub fn pack(manifest: &[u8], artifacts: &[(String, Vec<u8>)], output: &Path) -> Result<()> {
    let file = File::create(output)?;
    let gzip = is_gzip_path(output);

    let writer: Box<dyn Write> = if gzip {
        Box::new(GzEncoder::new(file, Compression::default()))
    } else {
        Box::new(file)
    };

    let mut builder = tar::Builder::new(writer);
    append_member(&mut builder, ARCHIVE_MANIFEST_MEMBER, manifest)?;
    for (basename, contents) in artifacts {
        let member = format!("{}/{}", ARCHIVE_ARTIFACTS_DIR, basename);
        append_member(&mut builder, &member, contents)?;
    }
    let mut writer = builder.into_inner()?;
    writer.flush()?;
    Ok(())
}

/// Unpacks a release archive from disk.
pub fn unpack(path: &Path) -> Result<ReleaseArchive> {
    let mut raw = Vec::new();
    File::open(path)?.read_to_end(&mut raw)?;

    // Sniff gzip rather than trusting the extension.
    let data = if raw.starts_with(&[0x1f, 0x8b]) {
        let mut decoded = Vec::new();
        GzDecoder::new(Cursor::new(raw))
            .read_to_end(&mut decoded)
            .map_err(|e| invalid(path, format!("gzip decode failed: {e}")))?;
        decoded
    } else {
        raw
    };

    let mut archive = tar::Archive::new(Cursor::new(data));
    let mut manifest: Option<Vec<u8>> = None;
    let mut artifacts: Vec<(String, Vec<u8>)> = Vec::new();

    for entry in archive
        .entries()
        .map_err(|e| invalid(path, e.to_string()))?
    {
        let mut entry = entry.map_err(|e| invalid(path, e.to_string()))?;
        let member = entry
            .path()
            .map_err(|e| invalid(path, e.to_string()))?
            .to_string_lossy()
            .into_owned();

        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| invalid(path, e.to_string()))?;

        if member == ARCHIVE_MANIFEST_MEMBER {
            manifest = Some(contents);
        } else if let Some(basename) = member
            .strip_prefix(ARCHIVE_ARTIFACTS_DIR)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            if !basename.is_empty() {
                artifacts.push((basename.to_string(), contents));
            }
        }
    }

    let manifest = manifest.ok_or_else(|| {
        invalid(path, format!("missing '{}' member", ARCHIVE_MANIFEST_MEMBER))
    })?;

    Ok(ReleaseArchive {
        manifest,
        artifacts,
    })
}

fn append_member<W: Write>(
    builder: &mut tar::Builder<W>,
    member: &str,
    contents: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, member, contents)?;
    Ok(())
}

fn is_gzip_path(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".gz") || name.ends_with(".tgz")
}

fn invalid(path: &Path, reason: impl Into<String>) -> Error {
    Error::InvalidArchive {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

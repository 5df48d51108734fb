//! Filesystem access: globbing and byte-stream open with transparent
//! compression.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use flowmesh_core::{Error, Result};

use crate::compression::CompressionKind;

/// One input file as the line reader sees it.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub path: PathBuf,
    /// On-disk size in bytes (compressed size for compressed files).
    pub size: u64,
    pub compression: CompressionKind,
}

/// Expand a glob pattern into a sorted list of paths. Sorted output keeps
/// the virtual concatenation identical on every worker.
pub fn glob_paths(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = glob::glob(pattern)
        .map_err(|error| Error::InvalidArgument(format!("bad glob pattern: {error}")))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path =
            entry.map_err(|error| Error::Io(std::io::Error::other(error.to_string())))?;
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    debug!(pattern, files = paths.len(), "glob expanded");
    Ok(paths)
}

pub fn file_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

/// Stat every match of `pattern` and detect its compression.
pub fn collect_input(pattern: &str) -> Result<Vec<InputFile>> {
    glob_paths(pattern)?
        .into_iter()
        .map(|path| {
            let size = file_size(&path)?;
            let compression = CompressionKind::from_path(&path);
            Ok(InputFile {
                path,
                size,
                compression,
            })
        })
        .collect()
}

/// Open `path` for reading plain bytes, decompressing by suffix.
pub fn open_for_read(path: &Path) -> Result<Box<dyn Read + Send>> {
    let file = BufReader::new(File::open(path)?);
    CompressionKind::from_path(path).wrap_reader(Box::new(file))
}

/// Open `path` for writing plain bytes, compressing by suffix. The stream
/// is finalized when the writer drops.
pub fn open_for_write(path: &Path) -> Result<Box<dyn Write + Send>> {
    let file = BufWriter::new(File::create(path)?);
    CompressionKind::from_path(path).wrap_writer(Box::new(file))
}

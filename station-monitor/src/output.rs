/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Sample output files.
//!
//! Samples are appended to a staging file whose name is a `strftime`
//! pattern applied to the sample time quantised to the output rate, so all
//! samples inside one interval share a file.  [`DataWriter::archive`] moves
//! completed files to the archive directory, gzip-compressing them on the
//! way.

use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};

pub const DEFAULT_NAME: &str = "data-%Y%m%d-%H%M%S.dat";

const FILE_MODE: u32 = 0o664;

#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    /// `strftime` pattern for file names.
    pub name: String,
    /// Samples in the same interval share a file.  `None` gives every sample
    /// its own file.
    pub rate: Option<Duration>,
    pub staging: PathBuf,
    pub path: PathBuf,
    pub compress: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            rate: None,
            staging: PathBuf::from("."),
            path: PathBuf::from("."),
            compress: true,
        }
    }
}

#[derive(Debug)]
pub struct DataWriter {
    config: OutputConfig,
}

fn invalid(reason: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, reason)
}

/// Start of the `rate` interval containing `at`.
pub fn quantise(at: DateTime<Utc>, rate: Option<Duration>) -> DateTime<Utc> {
    let Some(rate) = rate.filter(|r| r.as_secs() > 0) else {
        return at;
    };
    let step = rate.as_secs() as i64;
    let secs = at.timestamp().div_euclid(step) * step;
    Utc.timestamp_opt(secs, 0).single().unwrap_or(at)
}

/// Literal text before the first and after the last conversion.
fn name_affixes(pattern: &str) -> (&str, &str) {
    let prefix = pattern.find('%').map_or(pattern, |i| &pattern[..i]);
    let suffix = match pattern.rfind('%') {
        Some(i) => pattern[i + 1..]
            .char_indices()
            .nth(1)
            .map_or("", |(j, _)| &pattern[i + 1 + j..]),
        None => "",
    };
    (prefix, suffix)
}

fn finish(file: &File) -> io::Result<()> {
    file.sync_all()?;
    file.set_permissions(fs::Permissions::from_mode(FILE_MODE))
}

impl DataWriter {
    pub fn new(config: OutputConfig) -> io::Result<Self> {
        let writer = Self { config };
        writer.file_name(Utc::now())?;
        Ok(writer)
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    fn file_name(&self, at: DateTime<Utc>) -> io::Result<String> {
        let mut name = String::new();
        write!(name, "{}", quantise(at, self.config.rate).format(&self.config.name))
            .map_err(|_| invalid(format!("invalid output name pattern '{}'", self.config.name)))?;
        Ok(name)
    }

    /// Appends `data` to the file for `at` and returns its path.
    pub fn save(&self, at: DateTime<Utc>, data: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.config.staging)?;
        let path = self.config.staging.join(self.file_name(at)?);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(data)?;
        finish(&file)?;
        debug!(path = %path.display(), bytes = data.len(), "sample saved");
        Ok(path)
    }

    fn staged_files(&self) -> io::Result<Vec<PathBuf>> {
        let (prefix, suffix) = name_affixes(&self.config.name);
        let dir = glob::Pattern::escape(&self.config.staging.to_string_lossy());
        let pattern = format!(
            "{}/{}*{}",
            dir,
            glob::Pattern::escape(prefix),
            glob::Pattern::escape(suffix)
        );
        let paths = glob::glob(&pattern).map_err(|e| invalid(e.to_string()))?;
        // Archived outputs land next to staged files when both directories match.
        let archived_here = self.config.compress && self.config.staging == self.config.path;
        let mut files: Vec<PathBuf> = paths
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .filter(|p| !(archived_here && p.extension().is_some_and(|e| e == "gz")))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Moves every completed staging file to the archive directory.  With an
    /// output rate the newest file may still be written to and stays.
    pub fn archive(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = self.staged_files()?;
        if self.config.rate.is_some() {
            files.pop();
        }
        if files.is_empty() {
            return Ok(Vec::new());
        }
        if !self.config.compress && self.config.staging == self.config.path {
            return Ok(Vec::new());
        }

        fs::create_dir_all(&self.config.path)?;
        let mut archived = Vec::with_capacity(files.len());
        for source in files {
            let dest = if self.config.compress {
                compress_into(&source, &self.config.path)?
            } else {
                move_into(&source, &self.config.path)?
            };
            info!(file = %dest.display(), "archived output file");
            archived.push(dest);
        }
        Ok(archived)
    }
}

fn file_name(path: &Path) -> io::Result<&std::ffi::OsStr> {
    path.file_name()
        .ok_or_else(|| invalid(format!("{} has no file name", path.display())))
}

fn compress_into(source: &Path, dir: &Path) -> io::Result<PathBuf> {
    let mut name = file_name(source)?.to_os_string();
    name.push(".gz");
    let dest = dir.join(name);

    let mut input = File::open(source)?;
    let mut encoder = GzEncoder::new(File::create(&dest)?, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    let output = encoder.finish()?;
    finish(&output)?;
    fs::remove_file(source)?;
    Ok(dest)
}

fn move_into(source: &Path, dir: &Path) -> io::Result<PathBuf> {
    let dest = dir.join(file_name(source)?);
    if fs::rename(source, &dest).is_err() {
        fs::copy(source, &dest)?;
        fs::remove_file(source)?;
    }
    Ok(dest)
}

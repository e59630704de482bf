//! File-backed progress.
//!
//! One `{subject}_progress.txt` per subject. Every update rewrites the file with a
//! single `"{percent:.2}% - {message}"` line; completion appends `DONE - msg` or
//! `ERROR - msg`. Readers only look at the last non-empty line. Files are replaced
//! through a temporary file and a rename, so a reader never sees a partial write.

use super::observer::ProgressObserver;
use super::types::{ProgressState, ProgressStatus};

use regex::Regex;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub struct FileProgressObserver {
    folder: PathBuf,
}

impl FileProgressObserver {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn path_for(&self, subject: &str) -> PathBuf {
        self.folder.join(format!("{}_progress.txt", subject))
    }

    fn write_line(&self, subject: &str, line: String, append: bool) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.folder)?;
        let path = self.path_for(subject);

        let mut contents = if append {
            match std::fs::read_to_string(&path) {
                Ok(existing) => existing,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(e) => return Err(e),
            }
        } else {
            String::new()
        };
        contents.push_str(&line);

        let temp_path = self
            .folder
            .join(format!(".{}_progress.{}.tmp", subject, uuid::Uuid::new_v4().simple()));
        let written = (|| -> std::io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(contents.as_bytes())?;
            std::fs::rename(&temp_path, &path)
        })();

        if written.is_err() {
            let _ = std::fs::remove_file(&temp_path);
        }
        written
    }
}

impl ProgressObserver for FileProgressObserver {
    fn on_progress(&self, subject: &str, percent: f32, message: &str) {
        let line = format!("{:.2}% - {}\n", percent, message);
        if let Err(e) = self.write_line(subject, line, false) {
            tracing::warn!("Failed to write progress for {}: {}", subject, e);
        }
    }

    fn on_complete(&self, subject: &str, success: bool, message: &str) {
        let marker = if success { "DONE" } else { "ERROR" };
        let line = format!("{} - {}\n", marker, message);
        if let Err(e) = self.write_line(subject, line, true) {
            tracing::warn!("Failed to write completion for {}: {}", subject, e);
        }
    }
}

fn percent_line() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)%\s*-\s*(.*)$").ok())
        .as_ref()
}

fn parse_percent(line: &str) -> Option<(f32, String)> {
    let caps = percent_line()?.captures(line)?;
    let percent = caps.get(1)?.as_str().parse::<f32>().ok()?;
    let message = caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
    Some((percent.clamp(0.0, 100.0), message))
}

fn strip_marker<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(marker)?;
    Some(rest.trim_start_matches([' ', '-']).trim())
}

/// Interprets the contents of a progress file.
///
/// Empty means pending; a last line starting with `ERROR` is failed; `DONE` or a
/// last line at 100% is completed; anything else is processing.
pub fn parse_progress(subject: &str, contents: &str) -> ProgressState {
    let lines: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let Some(&last) = lines.last() else {
        return ProgressState::pending(subject);
    };

    // Percent recorded before a terminal marker, if any.
    let previous_percent = lines
        .iter()
        .rev()
        .skip(1)
        .find_map(|l| parse_percent(l))
        .map(|(p, _)| p);

    let (percent, status, message) = if let Some(msg) = strip_marker(last, "ERROR") {
        (previous_percent.unwrap_or(0.0), ProgressStatus::Failed, msg.to_string())
    } else if let Some(msg) = strip_marker(last, "DONE") {
        (100.0, ProgressStatus::Completed, msg.to_string())
    } else if let Some((percent, msg)) = parse_percent(last) {
        let status = if percent >= 100.0 {
            ProgressStatus::Completed
        } else {
            ProgressStatus::Processing
        };
        (percent, status, msg)
    } else {
        (
            previous_percent.unwrap_or(0.0),
            ProgressStatus::Processing,
            last.to_string(),
        )
    };

    ProgressState {
        subject_id: subject.to_string(),
        percent,
        status,
        message,
    }
}

/// Reads and parses a progress file. A missing file is pending.
pub fn read_progress_file(subject: &str, path: &Path) -> std::io::Result<ProgressState> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(parse_progress(subject, &contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ProgressState::pending(subject)),
        Err(e) => Err(e),
    }
}

//! Small file, chunking and date helpers to point the harness at.
//!
//! Each helper rejects input it considers malformed with a `Validation` or
//! `TypeMismatch` error, which the harness tolerates. Anything else that goes
//! wrong is a finding.

use chrono::NaiveDate;
use gauntlet_core::{ConfigError, TargetDescriptor, TargetError};
use std::fs;
use std::io;
use std::path::{Component, Path};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Writes `content` to `path`, relative to the working directory, and returns
/// the number of bytes written.
pub fn dump_content_into_file(content: &str, path: &str) -> Result<usize, TargetError> {
    dump_content_under(Path::new("."), content, path)
}

fn dump_content_under(root: &Path, content: &str, path: &str) -> Result<usize, TargetError> {
    if path.is_empty() {
        return Err(TargetError::Validation("file path must not be empty".into()));
    }
    if path.contains('\0') {
        return Err(TargetError::Validation("file path contains a NUL byte".into()));
    }
    let relative = Path::new(path);
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(TargetError::Validation(format!(
            "file path must stay inside the working directory: {path:?}"
        )));
    }
    fs::write(root.join(relative), content)?;
    Ok(content.len())
}

/// Splits `text` into chunks of `size` characters; `size` must be a positive
/// integer.
pub fn make_chunks(text: &str, size: &str) -> Result<Vec<String>, TargetError> {
    let size: usize = size
        .trim()
        .parse()
        .map_err(|_| TargetError::TypeMismatch(format!("chunk size is not an integer: {size:?}")))?;
    if size == 0 {
        return Err(TargetError::Validation("chunk size must be positive".into()));
    }
    let chars: Vec<char> = text.chars().collect();
    Ok(chars.chunks(size).map(|c| c.iter().collect()).collect())
}

/// Whether `path` names an existing regular file with a `.py` extension.
pub fn check_python_file(path: &str) -> Result<bool, TargetError> {
    if path.is_empty() {
        return Err(TargetError::Validation("file path must not be empty".into()));
    }
    let path = Path::new(path);
    if path.extension().and_then(|e| e.to_str()) != Some("py") {
        return Ok(false);
    }
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if is_rejection(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Signed number of days from `start` to `end`, both `YYYY-MM-DD`.
pub fn days_between(start: &str, end: &str) -> Result<i64, TargetError> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    Ok(end.signed_duration_since(start).num_days())
}

/// Counts `.py` files directly inside `dir`.
pub fn get_python_file_count(dir: &str) -> Result<usize, TargetError> {
    if dir.is_empty() {
        return Err(TargetError::Validation("directory must not be empty".into()));
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if is_rejection(&e) => {
            return Err(TargetError::Validation(format!("not a readable directory: {e}")));
        }
        Err(e) => return Err(e.into()),
    };
    let mut count = 0;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "py") {
            count += 1;
        }
    }
    Ok(count)
}

fn parse_date(text: &str) -> Result<NaiveDate, TargetError> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| TargetError::TypeMismatch(format!("{text:?} is not a {DATE_FORMAT} date: {e}")))
}

// Missing paths are bad input.
fn is_rejection(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory | io::ErrorKind::InvalidInput
    )
}

/// Every demonstration target, in a fixed order.
pub fn all() -> Result<Vec<TargetDescriptor>, ConfigError> {
    Ok(vec![
        TargetDescriptor::new("dump-content-into-file", dump_content_into_file)?,
        TargetDescriptor::new("make-chunks", make_chunks)?,
        TargetDescriptor::new("check-python-file", check_python_file)?,
        TargetDescriptor::new("days-between", days_between)?,
        TargetDescriptor::new("get-python-file-count", get_python_file_count)?,
    ])
}

/// Picks the targets named in `filter`, or all of them when it is empty.
pub fn select(filter: &[String]) -> anyhow::Result<Vec<TargetDescriptor>> {
    let available = all()?;
    if filter.is_empty() {
        return Ok(available);
    }
    filter
        .iter()
        .map(|name| {
            available
                .iter()
                .find(|t| t.name() == name)
                .cloned()
                .ok_or_else(|| {
                    let names: Vec<&str> = available.iter().map(|t| t.name()).collect();
                    anyhow::anyhow!("Unknown target '{}'. Available: {}", name, names.join(", "))
                })
        })
        .collect()
}

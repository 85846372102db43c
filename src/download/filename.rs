//! File name derivation and collision handling for new downloads.
//!
//! A URL such as `https://host/images/picture.jpg?size=2` becomes
//! `picture.jpg`. When that name is taken, a counter is inserted before the
//! extension: `picture (2).jpg`, `picture (3).jpg`, ...

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// Name used when nothing usable is left of the URL.
const FALLBACK_FILENAME: &str = "download";

#[allow(clippy::expect_used)]
static TRAILING_JUNK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9.]+$").expect("trailing regex is valid"));

#[allow(clippy::expect_used)]
static UNSAFE_CHAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9.]").expect("unsafe-char regex is valid"));

/// Derives a file name from a URL.
///
/// Strips the scheme and query string, keeps the last path segment (unless
/// the URL ends with `/`), drops trailing characters that are neither
/// alphanumeric nor `.`, and replaces any remaining such characters with `_`.
#[must_use]
pub fn filename_for_url(url: &str) -> String {
    let mut rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    if let Some(query) = rest.find('?') {
        rest = &rest[..query];
    }
    if let Some(slash) = rest.rfind('/')
        && slash != rest.len() - 1
    {
        rest = &rest[slash + 1..];
    }

    let trimmed = TRAILING_JUNK.replace(rest, "");
    let name = UNSAFE_CHAR.replace_all(&trimmed, "_").into_owned();

    if name.chars().all(|c| c == '.') {
        FALLBACK_FILENAME.to_string()
    } else {
        name
    }
}

/// Returns the next name in the collision sequence.
///
/// `name.ext` becomes `name (2).ext`; `name (n).ext` becomes `name (n+1).ext`.
/// The extension starts at the first dot, so `a.tar.gz` becomes `a (2).tar.gz`.
#[must_use]
pub fn next_filename(name: &str) -> String {
    let ext_start = name.find('.').unwrap_or(name.len());
    let (stem, ext) = name.split_at(ext_start);

    if let Some(inner) = stem.strip_suffix(')')
        && let Some(open) = inner.rfind('(')
        && open > 0
        && let Ok(count) = inner[open + 1..].parse::<u32>()
    {
        return format!("{}{}){ext}", &inner[..=open], count.saturating_add(1));
    }

    format!("{stem} (2){ext}")
}

/// Resolves a path in `dir` for `url` that does not exist yet.
#[must_use]
pub fn unique_path_for_url(url: &str, dir: &Path) -> PathBuf {
    let mut name = filename_for_url(url);
    while dir.join(&name).exists() {
        name = next_filename(&name);
    }
    dir.join(name)
}

/// Creates an empty file for `url` in `dir`, reserving a non-colliding name.
///
/// Retries when another writer takes the candidate between the existence
/// check and creation.
///
/// # Errors
///
/// Returns the IO error if the file cannot be created for any reason other
/// than the name already being taken.
pub fn create_file_for_url(url: &str, dir: &Path) -> io::Result<PathBuf> {
    loop {
        let path = unique_path_for_url(url, dir);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                debug!(path = %path.display(), "reserved download file");
                return Ok(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
}

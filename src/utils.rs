//! Utility functions for formatting and entry selection
//!
//! - [`EntryFilter`]: include/exclude patterns applied by the iterator
//! - [`format_size`]: human-readable byte counts
//! - [`format_datetime`]: archive timestamps for listings
//! - `spinner`: progress display shared by create and extract
//!
//! # Pattern semantics
//!
//! Include patterns are anchored at the start of the entry name, and a
//! pattern that matches a directory also selects everything below it:
//! `docs` selects `docs/readme.txt`. Exclude patterns are unanchored: they
//! may match any run of whole path components, so `*.log` drops
//! `logs/debug.log` and `target` drops `crate/target/out.bin`.
//!
//! # Examples
//!
//! ```
//! use gar::{EntryFilter, format_size};
//!
//! assert_eq!(format_size(1536 * 1024), "1.5M");
//!
//! let filter = EntryFilter::new(vec!["docs".into()], vec!["*.tmp".into()], false);
//! assert!(filter.matches("docs/readme.txt"));
//! assert!(!filter.matches("docs/draft.tmp"));
//! assert!(!filter.matches("src/lib.rs"));
//! ```

use indicatif::{ProgressBar, ProgressStyle};
use std::borrow::Cow;

use crate::error::Result;
use crate::glob::glob_match;

/// Format a byte size as a human-readable string.
///
/// # Examples
///
/// ```
/// use gar::format_size;
///
/// assert_eq!(format_size(512), "512B");
/// assert_eq!(format_size(1024), "1.0K");
/// assert_eq!(format_size(2 * 1024 * 1024 * 1024), "2.0G");
/// ```
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.1}G", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.1}M", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.1}K", size as f64 / KB as f64)
    } else {
        format!("{}B", size)
    }
}

/// Predicate over entry names built from include and exclude patterns.
///
/// The default filter has no patterns and matches every entry.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    includes: Vec<String>,
    excludes: Vec<String>,
    case_insensitive: bool,
}

impl EntryFilter {
    pub fn new(includes: Vec<String>, excludes: Vec<String>, case_insensitive: bool) -> Self {
        let normalize = |patterns: Vec<String>| -> Vec<String> {
            patterns
                .into_iter()
                .map(|p| {
                    let p = p.trim_end_matches('/');
                    if case_insensitive {
                        p.to_lowercase()
                    } else {
                        p.to_string()
                    }
                })
                .collect()
        };

        Self {
            includes: normalize(includes),
            excludes: normalize(excludes),
            case_insensitive,
        }
    }

    /// True when the filter has no patterns at all
    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }

    /// Decide whether the entry called `name` is selected.
    ///
    /// Exclusions win over inclusions; without include patterns everything
    /// not excluded is selected.
    pub fn matches(&self, name: &str) -> bool {
        if self.is_empty() {
            return true;
        }

        let name: Cow<'_, str> = if self.case_insensitive {
            Cow::Owned(name.to_lowercase())
        } else {
            Cow::Borrowed(name)
        };

        if self.excludes.iter().any(|p| matches_any_span(p, &name)) {
            return false;
        }

        self.includes.is_empty() || self.includes.iter().any(|p| matches_leading(p, &name))
    }
}

/// `pattern` matches `name` itself or one of its leading directories
fn matches_leading(pattern: &str, name: &str) -> bool {
    glob_match(pattern, name)
        || name
            .match_indices('/')
            .any(|(end, _)| glob_match(pattern, &name[..end]))
}

/// `pattern` matches some run of whole components of `name`
fn matches_any_span(pattern: &str, name: &str) -> bool {
    let mut starts = std::iter::once(0).chain(name.match_indices('/').map(|(i, _)| i + 1));
    starts.any(|start| matches_leading(pattern, &name[start..]))
}

/// Spinner for streaming operations whose entry count is unknown up front.
///
/// Returns `None` when `quiet` is non-zero.
pub(crate) fn spinner(quiet: u8, label: &str) -> Option<ProgressBar> {
    if quiet > 0 {
        return None;
    }

    let template = format!("{{spinner:.green}} {label} [{{elapsed_precise}}] {{pos}} entries {{wide_msg}}");
    let style = ProgressStyle::default_spinner()
        .template(&template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let pb = ProgressBar::new_spinner();
    pb.set_style(style);
    Some(pb)
}

/// Run `work` with `progress`, clearing the bar whether `work` succeeds or not
pub(crate) fn with_progress<T, E>(
    progress: Option<ProgressBar>,
    work: impl FnOnce(Option<ProgressBar>) -> Result<T, E>,
) -> Result<T, E> {
    let result = work(progress.clone());
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    result
}

/// Format Unix seconds as `YYYY-MM-DD HH:MM:SS` (UTC).
///
/// # Examples
///
/// ```
/// use gar::utils::format_datetime;
///
/// assert_eq!(format_datetime(0), "1970-01-01 00:00:00");
/// assert_eq!(format_datetime(1_705_314_600), "2024-01-15 10:30:00");
/// ```
pub fn format_datetime(unix_secs: u64) -> String {
    let days = (unix_secs / 86_400) as i64;
    let secs_of_day = unix_secs % 86_400;
    let (year, month, day) = date_from_days(days);

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year,
        month,
        day,
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60,
        secs_of_day % 60
    )
}

/// Civil date from days since 1970-01-01 (Howard Hinnant's algorithm)
fn date_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = (if z >= 0 { z } else { z - 146_096 }) / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe as i64 + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_format_size_units() {
        assert_eq!(format_size(0), "0B");
        assert_eq!(format_size(1023), "1023B");
        assert_eq!(format_size(1536), "1.5K");
        assert_eq!(format_size(1024 * 1024 + 512 * 1024), "1.5M");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0G");
    }

    #[test]
    fn test_filter_default_matches_all() {
        let filter = EntryFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches("anything/at/all"));
    }

    #[test]
    fn test_filter_include_selects_subtree() {
        let filter = EntryFilter::new(strings(&["src/"]), vec![], false);
        assert!(filter.matches("src"));
        assert!(filter.matches("src/main.rs"));
        assert!(filter.matches("src/bin/tool.rs"));
        assert!(!filter.matches("srcs/main.rs"));
        assert!(!filter.matches("tests/src/a.rs"));
    }

    #[test]
    fn test_filter_include_glob() {
        let filter = EntryFilter::new(strings(&["*.txt", "docs/*.md"]), vec![], false);
        assert!(filter.matches("file1.txt"));
        assert!(filter.matches("docs/guide.md"));
        assert!(!filter.matches("dir/file1.txt"));
        assert!(!filter.matches("guide.md"));
    }

    #[test]
    fn test_filter_exclude_unanchored() {
        let filter = EntryFilter::new(vec![], strings(&["*.log", "target"]), false);
        assert!(!filter.matches("debug.log"));
        assert!(!filter.matches("logs/debug.log"));
        assert!(!filter.matches("crate/target/out.bin"));
        assert!(filter.matches("crate/targets.txt"));
        assert!(filter.matches("notes.txt"));
    }

    #[test]
    fn test_filter_exclude_wins() {
        let filter = EntryFilter::new(strings(&["data"]), strings(&["secret*"]), false);
        assert!(filter.matches("data/a.csv"));
        assert!(!filter.matches("data/secret.csv"));
    }

    #[test]
    fn test_filter_case_insensitive() {
        let filter = EntryFilter::new(strings(&["*.JPG"]), vec![], true);
        assert!(filter.matches("holiday.jpg"));
        assert!(filter.matches("HOLIDAY.JPG"));

        let strict = EntryFilter::new(strings(&["*.JPG"]), vec![], false);
        assert!(!strict.matches("holiday.jpg"));
    }

    #[test]
    fn test_progress_cleared_on_error() {
        let pb = ProgressBar::hidden();
        let result: Result<()> = with_progress(Some(pb.clone()), |_| {
            Err(crate::error::ArchiveError::CorruptStream("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(pb.is_finished());
    }

    #[test]
    fn test_progress_cleared_on_success() {
        let pb = ProgressBar::hidden();
        let value = with_progress(Some(pb.clone()), |inner| -> Result<u8> {
            inner.unwrap().inc(1);
            Ok(7)
        })
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(pb.position(), 1);
        assert!(pb.is_finished());
    }

    #[test]
    fn test_format_datetime() {
        assert_eq!(format_datetime(0), "1970-01-01 00:00:00");
        assert_eq!(format_datetime(951_782_400), "2000-02-29 00:00:00");
        assert_eq!(format_datetime(1_705_314_600), "2024-01-15 10:30:00");
        assert_eq!(format_datetime(4_102_444_799), "2099-12-31 23:59:59");
    }
}

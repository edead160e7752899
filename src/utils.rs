//! Shared helpers: formatting and well-known scan locations

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Normalize a path for display (strip Windows long-path prefixes).
pub fn display_path(path: &Path) -> String {
    let path_str = path.to_string_lossy().to_string();
    #[cfg(windows)]
    {
        if let Some(stripped) = path_str.strip_prefix(r"\\?\UNC\") {
            return format!(r"\\{}", stripped);
        }
        if let Some(stripped) = path_str.strip_prefix(r"\\?\") {
            return stripped.to_string();
        }
    }
    path_str
}

/// Binary-unit size string, e.g. "1.5 MiB"
pub fn format_size(bytes: u64) -> String {
    bytesize::to_string(bytes, true)
}

/// Compact duration: "42s", "3m 7s", "2h 5m"
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Elapsed time rounded to the nearest whole second
pub fn round_secs(duration: Duration) -> u64 {
    (duration.as_millis() as u64 + 500) / 1000
}

/// Default scan roots when none are given: home, Documents, Downloads, Desktop.
///
/// Nested folders are dropped when their parent is already listed, so the
/// same file is not queued twice.
pub fn common_scan_locations() -> Vec<PathBuf> {
    let Some(user_dirs) = directories::UserDirs::new() else {
        return std::env::current_dir().map(|d| vec![d]).unwrap_or_default();
    };

    let mut locations = vec![user_dirs.home_dir().to_path_buf()];
    for dir in [
        user_dirs.document_dir(),
        user_dirs.download_dir(),
        user_dirs.desktop_dir(),
    ]
    .into_iter()
    .flatten()
    {
        if dir.exists() && !locations.iter().any(|l| dir.starts_with(l)) {
            locations.push(dir.to_path_buf());
        }
    }
    locations
}

/// Returns true if this path is a Windows reparse point (junction/symlink/mount point).
///
/// `walkdir`'s `follow_links(false)` stops at symlinks, but junctions are
/// reported as plain directories and would still be walked.
pub fn is_windows_reparse_point(path: &Path) -> bool {
    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;
        const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x0400;
        if let Ok(meta) = std::fs::symlink_metadata(path) {
            return meta.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0;
        }
        false
    }
    #[cfg(not(windows))]
    {
        let _ = path;
        false
    }
}

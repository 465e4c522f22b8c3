//! Folder size measurement.
//!
//! Only the files in the root and in two levels of subfolders are counted.
//! VM folders keep their disk images near the top, and the cap bounds the
//! cost of a walk that may run every time the emulator touches the folder.

use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Root files plus two levels of subfolders.
const MAX_DEPTH: usize = 3;

const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// Sum of file sizes under `root`, bounded to [`MAX_DEPTH`].
///
/// Files that vanish during the walk are skipped; a missing root or any
/// other I/O error fails the whole measurement.
pub fn folder_size(root: &Path) -> io::Result<u64> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("The directory '{}' does not exist.", root.display()),
        ));
    }

    let mut total: u64 = 0;
    for entry in WalkDir::new(root).max_depth(MAX_DEPTH) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_vanished(&e) => continue,
            Err(e) => return Err(e.into()),
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => total = total.saturating_add(meta.len()),
            Err(e) if is_vanished(&e) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total)
}

fn is_vanished(e: &walkdir::Error) -> bool {
    e.depth() > 0
        && e.io_error()
            .is_some_and(|io| io.kind() == io::ErrorKind::NotFound)
}

/// Human-readable size with 1024-based units and up to two decimals.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    let mut number = format!("{:.2}", size);
    if number.contains('.') {
        let trimmed = number.trim_end_matches('0').trim_end_matches('.').len();
        number.truncate(trimmed);
    }
    format!("{} {}", number, UNITS[unit])
}

/// Size string for the VM folder, or `"Error"` if it could not be measured.
pub fn folder_size_string(root: &Path) -> String {
    match folder_size(root) {
        Ok(bytes) => format_size(bytes),
        Err(e) => {
            log::debug!("Size of {} unavailable: {}", root.display(), e);
            "Error".to_string()
        }
    }
}

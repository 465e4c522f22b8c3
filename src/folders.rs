//! Attachment folder scan: printer tray and screenshots.

use crate::coalescer::{PRINTER_DIR_NAME, SCREENSHOTS_DIR_NAME};
use std::fs;
use std::path::Path;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "tiff"];

/// Result of scanning a VM folder's attachment folders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderScan {
    pub has_printer_folder: bool,
    /// Screenshot paths, `/`-separated and sorted. `None` when nothing was
    /// found, so callers can keep a list they already have.
    pub images: Option<Vec<String>>,
}

pub fn scan_folders(root: &Path) -> FolderScan {
    FolderScan {
        has_printer_folder: root.join(PRINTER_DIR_NAME).is_dir(),
        images: scan_screenshots(&root.join(SCREENSHOTS_DIR_NAME)),
    }
}

fn scan_screenshots(dir: &Path) -> Option<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::debug!("Could not list {}: {}", dir.display(), e);
            }
            return None;
        }
    };

    let mut images: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .map(|entry| entry.path())
        .filter(|path| is_image(path))
        .map(|path| path.to_string_lossy().replace('\\', "/"))
        .collect();

    if images.is_empty() {
        return None;
    }
    images.sort();
    Some(images)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
}

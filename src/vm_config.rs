//! Reader for the emulator's INI-like VM config file.
//!
//! `[Section]` lines open a section; `key = value` lines fill it. Blank
//! lines, lines without `=` and lines before the first section are ignored.
//! A repeated section header starts that section over.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Parsed config: section name to key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawConfig {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl RawConfig {
    pub fn parse(text: &str) -> Self {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut current: Option<String> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if line.len() >= 2 && line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].to_string();
                sections.insert(name.clone(), BTreeMap::new());
                current = Some(name);
                continue;
            }

            let Some(section) = current.as_ref().and_then(|name| sections.get_mut(name)) else {
                continue;
            };
            if let Some((key, value)) = line.split_once('=') {
                section.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        Self { sections }
    }

    /// Read and parse `path`.
    ///
    /// Files larger than `max_bytes` are not treated as a config and yield an
    /// empty result, as does any I/O error.
    pub fn read(path: &Path, max_bytes: u64) -> Self {
        match read_capped(path, max_bytes) {
            Ok(Some(text)) => Self::parse(&text),
            Ok(None) => {
                log::debug!(
                    "Config {} exceeds {} bytes, skipping",
                    path.display(),
                    max_bytes
                );
                Self::default()
            }
            Err(e) => {
                log::debug!("Could not read config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(name)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, String>)> {
        self.sections.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

fn read_capped(path: &Path, max_bytes: u64) -> std::io::Result<Option<String>> {
    let file = File::open(path)?;
    if file.metadata()?.len() > max_bytes {
        return Ok(None);
    }
    // The file may grow between the size check and the read.
    let mut buf = Vec::new();
    file.take(max_bytes.saturating_add(1)).read_to_end(&mut buf)?;
    if buf.len() as u64 > max_bytes {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_sections_and_padding() {
        let text = "\
[General]
vid_renderer = qt_software
  language=en-US

[Machine]
machine =ibmpc
this line is malformed
cpu_speed=  4772728
";
        let config = RawConfig::parse(text);
        assert_eq!(config.section_count(), 2);
        assert_eq!(config.get("General", "vid_renderer"), Some("qt_software"));
        assert_eq!(config.get("General", "language"), Some("en-US"));
        assert_eq!(config.get("Machine", "machine"), Some("ibmpc"));
        assert_eq!(config.get("Machine", "cpu_speed"), Some("4772728"));
        assert_eq!(config.section("Machine").map(|s| s.len()), Some(2));
    }

    #[test]
    fn test_first_equals_splits() {
        let config = RawConfig::parse("[A]\nkey = a=b = c\n");
        assert_eq!(config.get("A", "key"), Some("a=b = c"));
    }

    #[test]
    fn test_lines_before_first_section_ignored() {
        let config = RawConfig::parse("orphan = 1\n[A]\nx = 2\n");
        assert_eq!(config.section_count(), 1);
        assert_eq!(config.get("A", "orphan"), None);
        assert_eq!(config.get("A", "x"), Some("2"));
    }

    #[test]
    fn test_repeated_section_starts_over() {
        let config = RawConfig::parse("[A]\nx = 1\n[A]\ny = 2\n");
        assert_eq!(config.get("A", "x"), None);
        assert_eq!(config.get("A", "y"), Some("2"));
    }

    #[test]
    fn test_bom_and_crlf() {
        let config = RawConfig::parse("\u{feff}[A]\r\nx = 1\r\n");
        assert_eq!(config.get("A", "x"), Some("1"));
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = RawConfig::read(&temp_dir.path().join("86box.cfg"), 16384);
        assert!(config.is_empty());
    }

    #[test]
    fn test_read_oversized_file_is_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("86box.cfg");
        let mut text = String::from("[A]\nx = 1\n");
        while text.len() < 16385 {
            text.push_str("# padding padding padding\n");
        }
        fs::write(&path, &text).expect("write");

        assert!(RawConfig::read(&path, 16384).is_empty());
    }

    #[test]
    fn test_read_at_cap_is_parsed() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("86box.cfg");
        let mut text = String::from("[A]\nx = 1\n");
        text.push_str(&" ".repeat(16384 - text.len()));
        fs::write(&path, &text).expect("write");

        assert_eq!(RawConfig::read(&path, 16384).get("A", "x"), Some("1"));
    }
}

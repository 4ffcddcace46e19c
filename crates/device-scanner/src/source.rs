//! Candidate device enumeration

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use crate::DevicePath;

/// Lists candidate camera nodes
pub trait DeviceSource {
    fn candidates(&self) -> io::Result<Vec<DevicePath>>;
}

/// Lists character devices in a directory whose name contains a marker
pub struct DevDirectory {
    dir: PathBuf,
    marker: String,
}

impl DevDirectory {
    pub fn new(dir: impl Into<PathBuf>, marker: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            marker: marker.into(),
        }
    }
}

impl DeviceSource for DevDirectory {
    fn candidates(&self) -> io::Result<Vec<DevicePath>> {
        let mut names: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(self.marker.as_str()))
            .filter(|name| is_char_device(&self.dir.join(name)))
            .collect();
        names.sort_by(|a, b| natural_cmp(a, b));

        Ok(names
            .into_iter()
            .map(|name| DevicePath::new(self.dir.join(name)))
            .collect())
    }
}

/// Follows symlinks; unreadable entries are skipped
fn is_char_device(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.file_type().is_char_device())
        .unwrap_or(false)
}

/// Orders names by their non-numeric prefix, then by trailing number,
/// so "video2" sorts before "video10".
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a_stem, a_num) = split_trailing_number(a);
    let (b_stem, b_num) = split_trailing_number(b);

    a_stem
        .cmp(b_stem)
        .then_with(|| a_num.cmp(&b_num))
        .then_with(|| a.cmp(b))
}

fn split_trailing_number(name: &str) -> (&str, Option<u64>) {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let number = name[stem.len()..].parse().ok();
    (stem, number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_natural_order() {
        let mut names = vec!["video10", "video2", "video0", "video1"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["video0", "video1", "video2", "video10"]);
    }

    #[test]
    fn test_missing_directory_is_error() {
        let source = DevDirectory::new("/nonexistent/device/dir", "video");
        assert!(source.candidates().is_err());
    }

    #[test]
    fn test_lists_character_devices() {
        let found = DevDirectory::new("/dev", "null").candidates().unwrap();
        assert!(found.contains(&DevicePath::from("/dev/null")));
    }

    #[test]
    fn test_skips_regular_files_and_directories() {
        let dir = std::env::temp_dir().join(format!("scanner-src-{}", std::process::id()));
        fs::create_dir_all(dir.join("video1")).unwrap();
        fs::write(dir.join("video0"), b"").unwrap();
        std::os::unix::fs::symlink("/dev/null", dir.join("video2")).unwrap();

        let found = DevDirectory::new(&dir, "video").candidates().unwrap();
        fs::remove_dir_all(&dir).unwrap();

        // Only the link to a character device survives
        assert_eq!(found, vec![DevicePath::new(dir.join("video2"))]);
    }

    proptest! {
        #[test]
        fn natural_order_follows_index(mut indices in prop::collection::vec(0u32..1000, 1..20)) {
            let mut names: Vec<String> = indices.iter().map(|i| format!("video{}", i)).collect();
            names.sort_by(|a, b| natural_cmp(a, b));
            indices.sort();
            let expected: Vec<String> = indices.iter().map(|i| format!("video{}", i)).collect();
            prop_assert_eq!(names, expected);
        }
    }
}

use crate::core::hash::{ContentHash, content_hashes};
use crate::error::Result;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Crop files grouped by identical content, in discovery order.
///
/// Each key is one logical template; the first path of every group is its
/// representative. The table is never mutated once built.
#[derive(Debug, Clone, Default)]
pub struct UniqueCrops {
    classes: IndexMap<ContentHash, Vec<PathBuf>>,
}

impl UniqueCrops {
    /// Group `paths` by content hash. Any unreadable file aborts the grouping.
    pub fn group_by_content(paths: &[PathBuf]) -> Result<Self> {
        let mut classes: IndexMap<ContentHash, Vec<PathBuf>> = IndexMap::new();
        for (path, hash) in content_hashes(paths) {
            classes.entry(hash?).or_default().push(path);
        }
        Ok(Self { classes })
    }

    /// Like [`group_by_content`](Self::group_by_content) but leaves unreadable
    /// files out, returning them alongside the table.
    pub fn group_by_content_lenient(paths: &[PathBuf]) -> (Self, Vec<PathBuf>) {
        let mut classes: IndexMap<ContentHash, Vec<PathBuf>> = IndexMap::new();
        let mut skipped = Vec::new();
        for (path, hash) in content_hashes(paths) {
            match hash {
                Ok(hash) => classes.entry(hash).or_default().push(path),
                Err(err) => {
                    log::warn!("Skipping unreadable crop {}: {}", path.display(), err);
                    skipped.push(path);
                }
            }
        }
        (Self { classes }, skipped)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Total number of crop files across all classes.
    pub fn file_count(&self) -> usize {
        self.classes.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContentHash, &[PathBuf])> {
        self.classes.iter().map(|(hash, paths)| (hash, paths.as_slice()))
    }

    /// First file of the class in scan order.
    pub fn representative(&self, hash: &ContentHash) -> Option<&Path> {
        self.classes
            .get(hash)
            .and_then(|paths| paths.first())
            .map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(temp_dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = temp_dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_identical_bytes_share_a_class() {
        let temp_dir = TempDir::new().unwrap();
        let a = write(&temp_dir, "a.png", b"one");
        let b = write(&temp_dir, "b.png", b"two");
        let c = write(&temp_dir, "c.png", b"one");
        let d = write(&temp_dir, "d.png", b"one");

        let crops = UniqueCrops::group_by_content(&[a.clone(), b.clone(), c.clone(), d.clone()])
            .unwrap();

        assert_eq!(crops.len(), 2);
        assert_eq!(crops.file_count(), 4);

        let classes: Vec<(&ContentHash, &[PathBuf])> = crops.iter().collect();
        assert_eq!(classes[0].1, &[a.clone(), c, d][..]);
        assert_eq!(classes[1].1, &[b][..]);
        assert_eq!(crops.representative(classes[0].0), Some(a.as_path()));
    }

    #[test]
    fn test_every_file_in_exactly_one_class() {
        let temp_dir = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..12)
            .map(|i| write(&temp_dir, &format!("{i}.png"), &[(i % 5) as u8]))
            .collect();

        let crops = UniqueCrops::group_by_content(&paths).unwrap();
        assert_eq!(crops.len(), 5);

        let mut seen: Vec<PathBuf> = crops.iter().flat_map(|(_, p)| p.to_vec()).collect();
        seen.sort();
        let mut expected = paths.clone();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_unreadable_file_aborts() {
        let temp_dir = TempDir::new().unwrap();
        let a = write(&temp_dir, "a.png", b"one");
        let missing = temp_dir.path().join("missing.png");

        assert!(UniqueCrops::group_by_content(&[a, missing]).is_err());
    }

    #[test]
    fn test_lenient_grouping_skips_unreadable() {
        let temp_dir = TempDir::new().unwrap();
        let a = write(&temp_dir, "a.png", b"one");
        let missing = temp_dir.path().join("missing.png");

        let (crops, skipped) = UniqueCrops::group_by_content_lenient(&[a, missing.clone()]);
        assert_eq!(crops.len(), 1);
        assert_eq!(skipped, vec![missing]);
    }
}

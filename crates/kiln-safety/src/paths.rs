//! Lexical path handling for the workspace boundary check

use std::path::{Component, Path, PathBuf};

/// Resolve `path` against `root` and collapse `.` and `..` without touching
/// the filesystem.
pub fn normalize(root: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Whether `path` (relative paths resolve against `root`) stays inside `root`
pub fn is_within(root: &Path, path: &Path) -> bool {
    let root = normalize(Path::new("/"), root);
    normalize(&root, path).starts_with(&root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let root = Path::new("/home/u/proj");
        assert_eq!(
            normalize(root, Path::new("src/../lib.rs")),
            PathBuf::from("/home/u/proj/lib.rs")
        );
        assert_eq!(
            normalize(root, Path::new("/etc/./passwd")),
            PathBuf::from("/etc/passwd")
        );
    }

    #[test]
    fn test_is_within() {
        let root = Path::new("/home/u/proj");
        assert!(is_within(root, Path::new("src/main.rs")));
        assert!(is_within(root, Path::new("/home/u/proj/README.md")));
        assert!(!is_within(root, Path::new("/etc/passwd")));
        assert!(!is_within(root, Path::new("../other/file")));
        assert!(!is_within(root, Path::new("/home/u/proj2/file")));
    }
}

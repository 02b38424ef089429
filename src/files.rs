//! Workspace file listing.

use std::path::{Component, Path, PathBuf};

use crate::protocol::FileEntry;

/// List a directory inside a workspace, non-recursively.
///
/// `sub` is a path relative to the workspace root; absolute paths and
/// parent traversal are rejected. Dotfiles are filtered out. Directories
/// sort before files, each group alphabetically.
pub fn list_dir(workspace: &Path, sub: Option<&str>) -> Result<Vec<FileEntry>, String> {
    let target = match sub {
        Some(rel) => workspace.join(validate_relative(rel)?),
        None => workspace.to_path_buf(),
    };

    let read = std::fs::read_dir(&target)
        .map_err(|e| format!("Failed to read {}: {e}", target.display()))?;

    let mut entries = Vec::new();
    for entry in read.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let kind = if file_type.is_dir() {
            "directory"
        } else if file_type.is_symlink() {
            "symlink"
        } else {
            "file"
        };
        let size = if file_type.is_file() {
            entry.metadata().map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };
        entries.push(FileEntry {
            name,
            kind: kind.to_string(),
            size,
        });
    }

    entries.sort_by(|a, b| {
        let a_dir = a.kind == "directory";
        let b_dir = b.kind == "directory";
        b_dir.cmp(&a_dir).then_with(|| a.name.cmp(&b.name))
    });

    Ok(entries)
}

fn validate_relative(rel: &str) -> Result<PathBuf, String> {
    let path = Path::new(rel);
    if path.is_absolute() {
        return Err("path must be relative to the workspace".to_string());
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err("path may not leave the workspace".to_string()),
        }
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::{list_dir, validate_relative};

    #[test]
    fn lists_directories_before_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("README.md"), "hi").unwrap();
        std::fs::write(tmp.path().join(".hidden"), "").unwrap();

        let entries = list_dir(tmp.path(), None).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["src", "README.md"]);
        assert_eq!(entries[0].kind, "directory");
        assert_eq!(entries[1].size, 2);
    }

    #[test]
    fn rejects_escaping_paths() {
        assert!(validate_relative("../etc").is_err());
        assert!(validate_relative("/etc").is_err());
        assert!(validate_relative("src/nested").is_ok());
    }

    #[test]
    fn lists_subdirectory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("src/main.rs"), "fn main() {}").unwrap();

        let entries = list_dir(tmp.path(), Some("src")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "main.rs");
        assert_eq!(entries[0].kind, "file");
    }
}

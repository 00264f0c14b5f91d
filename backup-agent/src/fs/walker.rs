//! Directory traversal and content checksums for a site root.
//!
//! Paths are reported relative to the root with `/` separators, which is the
//! form the engine stores in its catalogs.

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::utils::{AgentError, Result};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Glob patterns matched against the relative path. A matching
    /// directory is skipped with everything below it.
    pub exclude_patterns: Vec<String>,
}

/// A regular file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root, `/`-separated
    pub relative_path: String,

    /// File size in bytes
    pub size: u64,
}

pub fn build_excludes(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| AgentError::InvalidPattern(format!("{}: {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| AgentError::InvalidPattern(e.to_string()))
}

/// Walk a directory tree and collect all regular files, sorted by relative
/// path. Directories, broken symlinks and symlinks to directories are
/// skipped.
pub fn walk_directory(root: &Path, options: &WalkOptions) -> Result<Vec<FileInfo>> {
    let excludes = build_excludes(&options.exclude_patterns)?;
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !excludes.is_match(relative_path(entry.path(), root))
        });

    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }

        let metadata = match std::fs::metadata(entry.path()) {
            Ok(m) if m.is_file() => m,
            // Broken symlink or symlink to a directory
            _ => continue,
        };

        files.push(FileInfo {
            path: entry.path().to_path_buf(),
            relative_path: relative_path(entry.path(), root),
            size: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

fn relative_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolves a catalog path below `root`, refusing anything that could
/// escape it (absolute paths, `..`, drive prefixes).
pub fn resolve_under(root: &Path, relative: &str) -> Result<PathBuf> {
    let candidate = Path::new(relative);
    if relative.is_empty() || !candidate.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(AgentError::UnsafePath(relative.to_string()));
    }
    Ok(root.join(candidate))
}

/// Hex-encoded SHA-256 of a file's content.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn sha256_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_walk_empty_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(files.len(), 0);
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("wp-content/themes"))?;
        fs::write(temp_dir.path().join("index.php"), b"<?php")?;
        fs::write(temp_dir.path().join("wp-content/themes/style.css"), b"body{}")?;

        let files = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["index.php", "wp-content/themes/style.css"]);
        assert_eq!(files[0].size, 5);

        Ok(())
    }

    #[test]
    fn test_exclude_patterns_prune_directories() -> Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("wp-content/cache/page"))?;
        fs::write(temp_dir.path().join("wp-content/cache/page/a.html"), b"cached")?;
        fs::write(temp_dir.path().join("debug.log"), b"noise")?;
        fs::write(temp_dir.path().join("index.php"), b"keep")?;

        let options = WalkOptions {
            follow_links: false,
            exclude_patterns: vec!["wp-content/cache".into(), "*.log".into()],
        };
        let files = walk_directory(temp_dir.path(), &options)?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "index.php");

        Ok(())
    }

    #[test]
    fn test_invalid_pattern() {
        let err = build_excludes(&["uploads/[".to_string()]).unwrap_err();
        assert!(matches!(err, AgentError::InvalidPattern(_)));
    }

    #[test]
    fn test_resolve_under_rejects_escapes() -> Result<()> {
        let root = Path::new("/srv/site");
        assert_eq!(resolve_under(root, "wp-config.php")?, root.join("wp-config.php"));
        assert!(resolve_under(root, "../etc/passwd").is_err());
        assert!(resolve_under(root, "/etc/passwd").is_err());
        assert!(resolve_under(root, "").is_err());
        Ok(())
    }

    #[test]
    fn test_sha256_file_matches_bytes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, b"hello")?;

        let digest = sha256_file(&path)?;
        assert_eq!(digest, sha256_bytes(b"hello"));
        assert_eq!(
            digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        Ok(())
    }
}

//! Repository file scanner for the CLI.
//!
//! Walks a checkout on disk and produces the `(path, text)` pairs the
//! ingestion pipeline consumes. Glob-based include/exclude filtering with
//! the usual vendored-noise directories excluded by default.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::FilesConfig;

pub fn scan_repository(config: &FilesConfig) -> Result<Vec<(String, String)>> {
    let root = &config.root;
    if !root.exists() {
        bail!("repository root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        // Binary files read as lossy UTF-8 would chunk into garbage;
        // skip anything that is not valid UTF-8.
        let Ok(text) = std::fs::read_to_string(path) else {
            continue;
        };

        files.push((rel_str, text));
    }

    // Deterministic ordering keeps chunk ids stable across runs.
    files.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(root: &TempDir) -> FilesConfig {
        FilesConfig {
            root: root.path().to_path_buf(),
            include_globs: vec!["**/*.rs".to_string(), "**/*.md".to_string()],
            exclude_globs: vec![],
            follow_symlinks: false,
        }
    }

    #[test]
    fn test_scan_respects_globs_and_sorts() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(tmp.path().join("README.md"), "# readme").unwrap();
        fs::write(tmp.path().join("image.png"), [0u8, 1, 2]).unwrap();

        let files = scan_repository(&config_for(&tmp)).unwrap();
        let paths: Vec<&str> = files.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src/main.rs"]);
    }

    #[test]
    fn test_scan_skips_git_and_target() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::create_dir_all(tmp.path().join("target/debug")).unwrap();
        fs::write(tmp.path().join(".git/config.md"), "x").unwrap();
        fs::write(tmp.path().join("target/debug/build.rs"), "x").unwrap();
        fs::write(tmp.path().join("lib.rs"), "pub fn x() {}").unwrap();

        let files = scan_repository(&config_for(&tmp)).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "lib.rs");
    }

    #[test]
    fn test_missing_root_errors() {
        let tmp = TempDir::new().unwrap();
        let mut config = config_for(&tmp);
        config.root = tmp.path().join("nope");
        assert!(scan_repository(&config).is_err());
    }
}

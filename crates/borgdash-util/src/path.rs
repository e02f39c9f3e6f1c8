//! Path helpers.
//!
//! Config paths are compared and locked in a lexical normal form: absolute,
//! with `.` and `..` folded away, symlinks left alone.

use std::path::{Component, Path, PathBuf};

/// The borgdash configuration directory (`$XDG_CONFIG_HOME/borgdash` or the
/// platform equivalent).
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("borgdash"))
}

/// Whether `path` lies inside `base`.
///
/// Existing paths are compared after resolving symlinks, so a link inside
/// `base` that points elsewhere is rejected. Paths that do not exist yet are
/// compared lexically.
pub fn is_within(path: &Path, base: &Path) -> bool {
    if let (Ok(resolved), Ok(resolved_base)) = (path.canonicalize(), base.canonicalize()) {
        return resolved.starts_with(resolved_base);
    }
    normalize(path).starts_with(normalize(base))
}

/// Fold `.` and `..` components without touching the filesystem.
///
/// `..` at the root stays at the root.
pub fn normalize(path: &Path) -> PathBuf {
    path.components()
        .fold(PathBuf::new(), |mut out, component| {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    out.pop();
                }
                other => out.push(other),
            }
            out
        })
}

/// Absolute, normalized form of `path`. Relative paths are resolved against
/// the current directory.
///
/// Returns `None` for an empty path or when the current directory is gone.
pub fn absolute(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    Some(normalize(&joined))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_name() {
        if let Some(dir) = config_dir() {
            assert!(dir.ends_with("borgdash"));
        }
    }

    #[test]
    fn test_snapshot_path_within_backup_dir() {
        let base = Path::new("/etc/borgmatic/.borgdash-backups");
        assert!(is_within(
            &base.join("config.yaml.2026-01-01T00-00-00.000000Z"),
            base
        ));
        assert!(!is_within(&base.join("../config.yaml"), base));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escaping_base_is_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let base = temp.path().join("backups");
        let outside = temp.path().join("config.yaml");
        std::fs::create_dir(&base).unwrap();
        std::fs::write(&outside, "a: 1\n").unwrap();
        let link = base.join("config.yaml.link");
        std::os::unix::fs::symlink(&outside, &link).unwrap();

        assert!(!is_within(&link, &base));
    }

    #[test]
    fn test_normalize_folds_dots() {
        assert_eq!(
            normalize(Path::new("/etc/./borgmatic/../borgmatic/config.yaml")),
            PathBuf::from("/etc/borgmatic/config.yaml")
        );
        assert_eq!(normalize(Path::new("/../etc")), PathBuf::from("/etc"));
    }

    #[test]
    fn test_absolute_resolves_relative() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(
            absolute(Path::new("./config.yaml")),
            Some(normalize(&cwd.join("config.yaml")))
        );
        assert_eq!(absolute(Path::new("")), None);
    }
}

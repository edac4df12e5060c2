use std::path::{Path, PathBuf};

/// Resolve the SwiftPick data root directory.
///
/// Priority:
/// 1. `--root` flag / `SWIFTPICK_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.swiftpick/`
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let mut dir = cwd.clone();
    loop {
        if dir.join(".swiftpick").is_dir() {
            return dir;
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => break,
        }
    }

    cwd
}

pub fn data_dir(root: &Path) -> PathBuf {
    root.join(".swiftpick")
}

pub fn config_path(root: &Path) -> PathBuf {
    data_dir(root).join("config.yaml")
}

pub fn queue_path(root: &Path) -> PathBuf {
    data_dir(root).join("queue.redb")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        let result = resolve_root(Some(dir.path()));
        assert_eq!(result, dir.path());
    }

    #[test]
    fn paths_hang_off_data_dir() {
        let root = Path::new("/tmp/app");
        assert_eq!(config_path(root), Path::new("/tmp/app/.swiftpick/config.yaml"));
        assert_eq!(queue_path(root), Path::new("/tmp/app/.swiftpick/queue.redb"));
    }
}

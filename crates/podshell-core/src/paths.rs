use crate::error::{CoreError, Result};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const DATA_DIR: &str = ".podshell";
pub const CONFIG_FILE: &str = "config.yaml";
pub const ACTION_LOGS_DIR: &str = "action_logs";
pub const STORE_NAME: &str = "podshell";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `explicit` when given, otherwise `$HOME/.podshell`.
pub fn data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir.to_path_buf()),
        None => home::home_dir()
            .map(|home| home.join(DATA_DIR))
            .ok_or(CoreError::HomeNotFound),
    }
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

pub fn action_logs_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(ACTION_LOGS_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers() {
        let root = Path::new("/data");
        assert_eq!(config_path(root), PathBuf::from("/data/config.yaml"));
        assert_eq!(action_logs_dir(root), PathBuf::from("/data/action_logs"));
        assert_eq!(
            data_dir(Some(Path::new("/custom"))).unwrap(),
            PathBuf::from("/custom")
        );
    }
}

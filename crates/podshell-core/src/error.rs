use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("home directory not found: set HOME or PODSHELL_HOME")]
    HomeNotFound,

    #[error("invalid action id: {0}")]
    InvalidActionId(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Launcher(#[from] podshell_launcher::LauncherError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

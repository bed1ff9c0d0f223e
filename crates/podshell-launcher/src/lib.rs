//! `podshell-launcher` drives the external workspace CLI as a subprocess.
//!
//! The CLI does the real work (building containers, starting IDEs). This
//! crate only knows how to launch it, read its newline-delimited JSON logs
//! and turn its exit status into a typed [`Failure`].
//!
//! # Architecture
//!
//! ```text
//! LaunchConfig          ← binary path, env vars, proxy settings, --debug
//!     │
//!     ▼
//! WorkspaceCommands     ← builds argv for up / stop / delete / status / list
//!     │
//!     ▼
//! CliCommand            ← run() to completion, or stream() NDJSON events
//!     │                   implements the `Operation` seam
//!     ▼
//! StreamEvent           ← { type: "data", data } | { type: "error", error }
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use podshell_launcher::{LaunchConfig, WorkspaceCommands};
//!
//! let config = LaunchConfig::new("/usr/local/bin/devpod");
//! let commands = WorkspaceCommands::new(config);
//! commands
//!     .stop("my-workspace")
//!     .stream(Box::new(|event| println!("{}", event.log().message)))
//!     .await?;
//! ```

pub mod command;
pub mod error;
pub(crate) mod process;
pub mod types;
pub mod workspace_commands;

pub use command::{CliCommand, EventSink, LaunchConfig, Operation};
pub use error::{Failure, FailureKind, LauncherError};
pub use types::{LogLine, ProcessOutput, StreamEvent};
pub use workspace_commands::{SourceConfig, StartConfig, WorkspaceCommands};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, LauncherError>;

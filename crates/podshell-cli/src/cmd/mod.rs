pub mod config;
pub mod history;
pub mod lifecycle;
pub mod list;
pub mod logs;
pub mod status;

/// Commands are synchronous at the top level; the ones that talk to the
/// workspace CLI drive their work on a fresh runtime.
pub(crate) fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

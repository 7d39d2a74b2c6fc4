use crate::cmd::runtime;
use anyhow::Context;
use rulesync_server::AppState;
use std::path::PathBuf;

pub fn run(port: u16, data: Option<PathBuf>) -> anyhow::Result<()> {
    let state = match data {
        Some(path) => AppState::with_data_file(path.clone())
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppState::new(),
    };
    let rt = runtime()?;
    rt.block_on(rulesync_server::serve(state, port))
}

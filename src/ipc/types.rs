use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::board::RoutineBoard;
use crate::config::Config;
use crate::db;
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub board: RoutineBoard,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            workspace: None,
            db: None,
            board: RoutineBoard::new(config.commit_settle, config.strict_probe),
            config,
        }
    }

    /// Switches to `path`, dropping every open routine of the previous workspace.
    pub fn open_workspace(&mut self, path: PathBuf) -> anyhow::Result<()> {
        let conn = db::open_db(&path)?;
        self.board.reset();
        info!(workspace = %path.display(), "workspace selected");
        self.workspace = Some(path);
        self.db = Some(conn);
        Ok(())
    }
}

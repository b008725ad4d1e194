use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

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
}

/// Explicit requester identity for every guarded mutation. There is no
/// ambient session: permission checks only ever see what the request
/// carried.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub user_id: String,
    pub faculty_board: bool,
}

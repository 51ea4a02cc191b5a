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

/// All ambient context, injected explicitly: the store and outbox
/// connections, the connectivity flag, and the flush re-entrancy guard.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub store: Option<Connection>,
    pub local: Option<Connection>,
    pub online: bool,
    pub flushing: bool,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            workspace: None,
            store: None,
            local: None,
            online: true,
            flushing: false,
        }
    }
}

use std::path::PathBuf;

use serde::Deserialize;

use crate::model::Role;
use crate::player::ViewerSession;
use crate::store::Store;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The identity-provider claim for the signed-in frontend user. `role` is
/// null when the identity has no user document yet.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub uid: String,
    pub email: String,
    pub role: Option<Role>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub store: Option<Store>,
    pub session: Option<SessionUser>,
    pub viewer: Option<ViewerSession>,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            workspace: None,
            store: None,
            session: None,
            viewer: None,
        }
    }
}

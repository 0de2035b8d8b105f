use std::path::PathBuf;
use std::sync::Arc;

use kumas_db::Database;
use kumas_gateway::dispatcher::Dispatcher;

use crate::tokens::TokenKeys;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub tokens: TokenKeys,
    /// Where uploaded profile images are written; served back under `/img`.
    pub upload_dir: PathBuf,
}

impl AppStateInner {
    pub fn new(db: Database, dispatcher: Dispatcher, tokens: TokenKeys, upload_dir: PathBuf) -> AppState {
        Arc::new(Self {
            db,
            dispatcher,
            tokens,
            upload_dir,
        })
    }
}

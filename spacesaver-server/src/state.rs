//! Shared application state handed to every axum handler, following the
//! teacher's `AppState` convention (`main.rs::AppState`): a `Clone`
//! struct of `Arc`s, constructed once at startup and never rebuilt per
//! request.

use crate::worker::progress::ProgressCell;
use spacesaver_config::Config;
use spacesaver_core::Catalog;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub config: Arc<Config>,
    pub progress: Arc<ProgressCell>,
}

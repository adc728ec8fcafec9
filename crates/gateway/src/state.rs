//! Shared handler state.

use std::sync::Arc;

use rf_broadcast::EventBroadcaster;
use rf_domain::config::Config;
use rf_pipeline::PipelineDeps;
use rf_store::Stores;
use rf_workflow::{Dispatcher, InProcessEngine};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    pub broadcaster: EventBroadcaster,
    pub dispatcher: Dispatcher,
    pub engine: Arc<InProcessEngine>,
    pub deps: PipelineDeps,
}

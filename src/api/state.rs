use std::sync::Arc;

use crate::dashboard::Dashboard;
use crate::location::LocationTracker;
use crate::polling::PollingController;

/// Shared handles behind every request.
#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<Dashboard>,
    pub polling: Arc<PollingController>,
    pub location: Arc<LocationTracker>,
}

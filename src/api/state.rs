//! Application state for the HTTP server

use crate::AcquisitionService;

/// Shared state handed to every handler (cheap clone)
#[derive(Clone)]
pub struct AppState {
    pub service: AcquisitionService,
}

impl AppState {
    pub fn new(service: AcquisitionService) -> Self {
        Self { service }
    }
}

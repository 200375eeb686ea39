use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::directory::ConnectionDirectory;
use crate::router::EventRouter;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub directory: Arc<ConnectionDirectory>,
    pub router: Arc<EventRouter>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self::with_directory(settings, Arc::new(ConnectionDirectory::new()))
    }

    /// Build state around an existing directory (shared with background tasks or tests)
    pub fn with_directory(settings: Settings, directory: Arc<ConnectionDirectory>) -> Self {
        let router = Arc::new(EventRouter::new(directory.clone()));

        Self {
            settings: Arc::new(settings),
            directory,
            router,
            start_time: Instant::now(),
        }
    }
}

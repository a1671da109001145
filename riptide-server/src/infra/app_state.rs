use std::{fmt, sync::Arc};

use riptide_core::{Config, DiskGuard, JobQueueHandle, RetentionSweeper};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub queue: JobQueueHandle,
    pub sweeper: Arc<RetentionSweeper>,
    pub disk: Arc<DiskGuard>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

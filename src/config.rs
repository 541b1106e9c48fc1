#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of procedures a new queue has room for before it reallocates.
    pub initial_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Max number of available queues a single poll tries to lock, before giving up.
    pub max_queue_scan: usize,
    /// Drop queues (and their lock entries) once they are drained and unlocked.
    pub evict_drained_queues: bool,
}

/// Configuration for a [`ProcedureScheduler`] and its queues.
///
/// [`ProcedureScheduler`]: crate::scheduler::ProcedureScheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub queue: QueueConfig,
    pub dispatch: DispatchConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig {
                initial_capacity: 8,
            },
            dispatch: DispatchConfig {
                max_queue_scan: 1_024,
                evict_drained_queues: true,
            },
        }
    }
}

impl SchedulerConfig {
    /// A config tuned for testing.
    ///
    /// - **dispatch:** Keeps drained queues around, so tests can inspect them afterwards.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            dispatch: DispatchConfig {
                evict_drained_queues: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        SchedulerConfig::default().dispatch
    }
}

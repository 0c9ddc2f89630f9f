/// Priority of a scheduled task.
///
/// Each level carries the maximum number of milliseconds a due task may be
/// held back while the scheduler is overloaded. Among tasks due on the same
/// tick, the one with the smaller allowance runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskPriority {
    /// Never deferred.
    Critical,
    /// Deferred up to 50 ms.
    Highest,
    /// Deferred up to 150 ms.
    High,
    /// Deferred up to 500 ms.
    Normal,
    /// Deferred up to 1.5 s.
    Low,
    /// Deferred up to 10 s.
    Lowest,
}

impl TaskPriority {
    pub const fn deferred_time(self) -> u32 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::Highest => 50,
            TaskPriority::High => 150,
            TaskPriority::Normal => 500,
            TaskPriority::Low => 1500,
            TaskPriority::Lowest => 10000,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

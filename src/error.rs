use std::sync::Arc;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A centralized error type for all loader and job operations.
///
/// Callers pattern-match on the variant to distinguish the failure kinds. All
/// variants are cheap to clone: a failed job stores its error once and hands a
/// clone to every waiter.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The job graph handed to `schedule` is invalid. Admission is rejected
    /// atomically; none of the jobs from the call were admitted.
    #[error("schedule failed: {message}")]
    ScheduleFailed { message: String },

    /// Loader construction parameters failed validation.
    #[error("invalid loader configuration: {message}")]
    InvalidConfig { message: String },

    /// The job's own body returned an error or panicked.
    #[error("load job '{name}' failed: {cause}")]
    Failed {
        name: String,
        cause: Arc<anyhow::Error>,
    },

    /// The job was cancelled before its body ran.
    #[error("load job '{name}' canceled")]
    Canceled { name: String },

    /// A dependency of the job reached FAILED, so its body will never run.
    #[error("load job '{name}' failed because its dependency '{dependency}' failed")]
    DependencyFailed { name: String, dependency: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Error: Send, Sync, Clone);

    #[test]
    fn failed_error_displays_the_cause() {
        let err = Error::Failed {
            name: "db_table".into(),
            cause: Arc::new(anyhow::anyhow!("out of disk")),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("db_table"));
        assert!(rendered.contains("out of disk"));
    }
}

//! Deadlines for remote operations
//!
//! Every call into a remote endpoint (cast receiver, capture agent) is raced
//! against a deadline. The losing future is dropped, so whatever it would have
//! done after the deadline never happens.

pub mod timeout {
    //! Timeout guard and deadline configuration

    use std::future::Future;
    use std::time::Duration;

    /// Default deadline for remote control-plane operations
    pub const REMOTE_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

    /// Deadline for stopping playback before a reload
    pub const STOP_PLAYBACK_TIMEOUT: Duration = Duration::from_secs(5);

    /// A remote operation did not settle before its deadline
    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("{label} timed out after {}ms", .deadline.as_millis())]
    pub struct TimeoutError {
        pub label: String,
        pub deadline: Duration,
    }

    /// Race `operation` against `deadline`.
    ///
    /// Exactly one outcome is produced. When the deadline wins, the operation
    /// is dropped and its eventual result is never observed.
    pub async fn guard<F, T>(operation: F, deadline: Duration, label: &str) -> Result<T, TimeoutError>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(deadline, operation)
            .await
            .map_err(|_| TimeoutError {
                label: label.to_string(),
                deadline,
            })
    }

    /// Same as [`guard`] for fallible operations, folding the timeout into `E`.
    pub async fn guard_result<F, T, E>(operation: F, deadline: Duration, label: &str) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<TimeoutError>,
    {
        guard(operation, deadline, label).await?
    }

    /// Deadlines applied by a device supervisor
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimeoutConfig {
        pub remote_op: Duration,
        pub stop: Duration,
    }

    impl Default for TimeoutConfig {
        fn default() -> Self {
            Self {
                remote_op: REMOTE_OPERATION_TIMEOUT,
                stop: STOP_PLAYBACK_TIMEOUT,
            }
        }
    }

    impl TimeoutConfig {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Set the deadline for connect/launch/status/load
        #[must_use]
        pub const fn with_remote_op_timeout(mut self, timeout: Duration) -> Self {
            self.remote_op = timeout;
            self
        }

        /// Set the deadline for stop-before-reload
        #[must_use]
        pub const fn with_stop_timeout(mut self, timeout: Duration) -> Self {
            self.stop = timeout;
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::timeout::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_never_settling_operation_times_out() {
        let started = Instant::now();
        let err = guard(std::future::pending::<()>(), Duration::from_millis(100), "pending op")
            .await
            .unwrap_err();

        assert_eq!(err.label, "pending op");
        assert_eq!(err.deadline, Duration::from_millis(100));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(err.to_string(), "pending op timed out after 100ms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_wins() {
        let value = guard(async { 7 }, Duration::from_millis(100), "fast").await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_losing_operation_cannot_mutate_state() {
        let touched = Arc::new(AtomicBool::new(false));
        let flag = touched.clone();
        let slow = async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            flag.store(true, Ordering::SeqCst);
        };

        assert!(guard(slow, Duration::from_millis(100), "slow").await.is_err());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!touched.load(Ordering::SeqCst));
    }

    #[derive(Debug, PartialEq)]
    enum OpError {
        Timeout(String),
        Failed,
    }

    impl From<TimeoutError> for OpError {
        fn from(err: TimeoutError) -> Self {
            Self::Timeout(err.label)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_result_flattens_errors() {
        let failed: Result<(), OpError> =
            guard_result(async { Err(OpError::Failed) }, Duration::from_secs(1), "fails").await;
        assert_eq!(failed, Err(OpError::Failed));

        let timed_out: Result<(), OpError> = guard_result(
            std::future::pending::<Result<(), OpError>>(),
            Duration::from_secs(1),
            "hangs",
        )
        .await;
        assert_eq!(timed_out, Err(OpError::Timeout("hangs".to_string())));
    }

    #[test]
    fn test_timeout_config() {
        let config = TimeoutConfig::new().with_stop_timeout(Duration::from_secs(2));
        assert_eq!(config.stop.as_secs(), 2);
        assert_eq!(config.remote_op, REMOTE_OPERATION_TIMEOUT);
    }
}

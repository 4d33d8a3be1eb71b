//! Readiness polling after a container is (re)created.

use std::time::Duration;
use tracing::debug;

use crate::runtime::{ExecOptions, Runtime, RuntimeError, RuntimeResult};

/// Polls until the container runs and answers a trivial exec.
///
/// Makes at most `attempts` checks, sleeping `interval` between them.
/// Returns the attempt number that succeeded.
pub(crate) async fn wait_ready(
    runtime: &dyn Runtime,
    container: &str,
    attempts: u32,
    interval: Duration,
) -> RuntimeResult<u32> {
    let probe = ["true".to_string()];
    for attempt in 1..=attempts {
        match runtime.is_running(container).await {
            Ok(true) => match runtime.exec(container, &probe, &ExecOptions::default()).await {
                Ok(output) if output.success() => return Ok(attempt),
                Ok(output) => debug!(container, attempt, code = output.exit_code, "not ready"),
                Err(e) => debug!(container, attempt, error = %e, "not ready"),
            },
            Ok(false) => debug!(container, attempt, "not running yet"),
            Err(e) => debug!(container, attempt, error = %e, "status failed"),
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(RuntimeError::timeout(interval * attempts))
}

use std::time::Duration;

/// Retry a function with exponential backoff.
///
/// Makes at most `max_attempts` calls (at least one), sleeping
/// `base_delay_ms * 2^n` between them, and returns the last error.
pub fn retry_with_backoff<F, T, E>(
    mut f: F,
    max_attempts: u32,
    base_delay_ms: u64,
    operation_name: &str,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match f() {
            Ok(result) => return Ok(result),
            Err(e) if attempt + 1 < max_attempts => {
                let delay_ms = base_delay_ms.saturating_mul(1u64 << attempt.min(16));
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms,
                    error = %e,
                    "Operation failed, retrying"
                );
                std::thread::sleep(Duration::from_millis(delay_ms));
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    operation = operation_name,
                    attempts = max_attempts,
                    error = %e,
                    "Operation failed, giving up"
                );
                return Err(e);
            }
        }
    }
}

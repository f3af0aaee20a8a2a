use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::STORE_MAX_ATTEMPTS;
use crate::errors::DomainError;

/// Exponential backoff with jitter, generalized from the fixed-attempt linear backoff
/// used for JetStream publish retries into the adaptive policy the Index Store
/// requires (§4.3, §7): up to `STORE_MAX_ATTEMPTS` attempts, doubling the base delay
/// each time and adding up to 50% jitter so concurrent workers don't retry in lockstep.
///
/// `classify` turns a raw attempt error into a `DomainError`; only `StoreTransient`
/// errors are retried. Any other kind returns immediately. Exhausting the attempt
/// budget on a transient error escalates to `StoreUnavailable`.
pub async fn with_retry<T, F, Fut>(operation: &str, mut attempt: F) -> Result<T, DomainError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, DomainError>>,
{
    let mut last_err: Option<String> = None;

    for attempt_no in 1..=STORE_MAX_ATTEMPTS {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(DomainError::StoreTransient(msg)) => {
                last_err = Some(msg.clone());
                metrics::counter!("index_store_retries_total").increment(1);
                if attempt_no < STORE_MAX_ATTEMPTS {
                    let delay = backoff_delay(attempt_no);
                    warn!(
                        operation,
                        attempt = attempt_no,
                        max_attempts = STORE_MAX_ATTEMPTS,
                        delay_ms = delay.as_millis() as u64,
                        error = %msg,
                        "transient store error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
            Err(other) => return Err(other),
        }
    }

    Err(DomainError::StoreUnavailable(format!(
        "{operation} failed after {STORE_MAX_ATTEMPTS} attempts: {}",
        last_err.unwrap_or_default()
    )))
}

fn backoff_delay(attempt_no: u32) -> Duration {
    const BASE_MS: u64 = 50;
    const CAP_MS: u64 = 5_000;

    let exp = BASE_MS.saturating_mul(1u64 << attempt_no.min(20));
    let capped = exp.min(CAP_MS);
    let jitter_fraction: f64 = rand::rng().random_range(0.0..0.5);
    let jittered = (capped as f64) * (1.0 + jitter_fraction);
    Duration::from_millis(jittered as u64)
}

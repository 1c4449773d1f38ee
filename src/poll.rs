//! Polling a verification until it confirms.

use cpay_types::proto::PaymentVerificationResult;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::PaymentError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Options for [`Payment::wait_until_confirmed`](crate::Payment::wait_until_confirmed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Overrides the configured default confirmation threshold.
    pub min_confirmations: Option<u32>,
    pub poll_interval: Duration,
    /// Measured from the first poll. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            min_confirmations: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

impl WaitOptions {
    pub fn with_min_confirmations(mut self, confirmations: u32) -> Self {
        self.min_confirmations = Some(confirmations);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Runs `verify` until it reports a confirmed payment.
///
/// `on_progress` sees every result before it is acted upon. Cancellation is
/// checked before each verification and races every sleep.
pub async fn poll_until_confirmed<F, Fut>(
    mut verify: F,
    options: &WaitOptions,
    mut on_progress: Option<&mut (dyn FnMut(&PaymentVerificationResult) + Send)>,
    cancel: &CancellationToken,
) -> Result<PaymentVerificationResult, PaymentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PaymentVerificationResult>,
{
    let started = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Err(PaymentError::Cancelled);
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PaymentError::Cancelled),
            result = verify() => result,
        };

        #[cfg(feature = "telemetry")]
        tracing::debug!(status = %result.status(), confirmations = result.confirmations(), "Poll result");

        if let Some(callback) = on_progress.as_mut() {
            callback(&result);
        }
        if result.is_confirmed() {
            return Ok(result);
        }
        match options.timeout {
            Some(timeout) if started.elapsed() >= timeout => {
                return Err(PaymentError::Timeout(timeout));
            }
            _ => {}
        }
        if cancel.is_cancelled() {
            return Err(PaymentError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PaymentError::Cancelled),
            _ = tokio::time::sleep(options.poll_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::txid;
    use bitcoin::Amount;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unconfirmed() -> PaymentVerificationResult {
        PaymentVerificationResult::Unconfirmed {
            txid: txid(1),
            confirmations: 0,
            amount: Amount::from_sat(1_000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_fails_after_first_poll() {
        let calls = AtomicU32::new(0);
        let options = WaitOptions::default().with_timeout(Duration::ZERO);
        let result = poll_until_confirmed(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { PaymentVerificationResult::NotFound }
            },
            &options,
            None,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(PaymentError::Timeout(d)) if d == Duration::ZERO));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirms_on_third_poll() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut seen = Vec::new();
        let mut on_progress = |r: &PaymentVerificationResult| seen.push(r.status());
        let options = WaitOptions::default().with_poll_interval(Duration::from_secs(15));
        let started = Instant::now();
        let result = poll_until_confirmed(
            || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        unconfirmed()
                    } else {
                        PaymentVerificationResult::Confirmed {
                            txid: txid(1),
                            confirmations: 1,
                            amount: Amount::from_sat(1_000),
                        }
                    }
                }
            },
            &options,
            Some(&mut on_progress),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(result.is_confirmed());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_polling() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = poll_until_confirmed(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { unconfirmed() }
            },
            &WaitOptions::default(),
            None,
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(PaymentError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_sleeping() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            trigger.cancel();
        });
        let result = poll_until_confirmed(
            || async { unconfirmed() },
            &WaitOptions::default(),
            None,
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(PaymentError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_several_polls() {
        let calls = AtomicU32::new(0);
        let options = WaitOptions::default()
            .with_poll_interval(Duration::from_secs(10))
            .with_timeout(Duration::from_secs(25));
        let result = poll_until_confirmed(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { unconfirmed() }
            },
            &options,
            None,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(PaymentError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}

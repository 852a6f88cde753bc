//! One-shot rendezvous between roles.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::RoleError;

/// Wait for a one-shot signal within `timeout`.
///
/// # Errors
/// Returns `Timeout` if the signal does not fire in time, or
/// `SignalDropped` if its sender went away without firing.
pub async fn wait_for<T>(
    signal: oneshot::Receiver<T>,
    timeout: Duration,
    name: &'static str,
) -> Result<T, RoleError> {
    match tokio::time::timeout(timeout, signal).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(RoleError::SignalDropped(name)),
        Err(_) => Err(RoleError::Timeout {
            after: timeout,
            waiting_for: name,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fired_signal_is_delivered() {
        let (tx, rx) = oneshot::channel();
        tx.send(7).unwrap();
        assert_eq!(wait_for(rx, Duration::from_secs(1), "ready").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_dropped_sender() {
        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);
        assert!(matches!(
            wait_for(rx, Duration::from_secs(1), "ready").await,
            Err(RoleError::SignalDropped("ready"))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_sender_times_out() {
        let (_tx, rx) = oneshot::channel::<()>();
        assert!(matches!(
            wait_for(rx, Duration::from_millis(50), "connected").await,
            Err(RoleError::Timeout { waiting_for: "connected", .. })
        ));
    }
}

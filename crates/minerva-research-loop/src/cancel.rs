use tokio_util::sync::CancellationToken;

/// Outcome of racing a future against task cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelAware<T> {
    Value(T),
    Cancelled,
}

/// Run `fut` unless the token fires first. In-flight work is dropped on
/// cancellation; its result is discarded by construction.
pub async fn await_or_cancel<T, F>(token: &CancellationToken, fut: F) -> CancelAware<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        _ = token.cancelled() => CancelAware::Cancelled,
        value = fut => CancelAware::Value(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn returns_value_when_not_cancelled() {
        let token = CancellationToken::new();
        let out = await_or_cancel(&token, async { 42usize }).await;
        assert_eq!(out, CancelAware::Value(42));
    }

    #[tokio::test]
    async fn resolves_cancelled_when_token_fires() {
        let token = CancellationToken::new();
        let token_for_task = token.clone();
        let handle = tokio::spawn(async move {
            await_or_cancel(&token_for_task, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                7usize
            })
            .await
        });

        token.cancel();
        let out = timeout(Duration::from_millis(300), handle)
            .await
            .expect("await_or_cancel should resolve quickly after cancellation")
            .expect("task should not panic");
        assert_eq!(out, CancelAware::Cancelled);
    }
}

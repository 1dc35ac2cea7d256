use crate::config::RetryPolicy;

/// Classify a provider failure message as worth retrying.
///
/// 4xx responses other than 429 are final; transport-level failures and
/// server errors are not.
pub(crate) fn is_retryable_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    let non_retryable = [
        "400",
        "401",
        "403",
        "404",
        "422",
        "unauthorized",
        "forbidden",
        "invalid api key",
        "invalid_request",
        "bad request",
    ];
    if non_retryable.iter().any(|p| lower.contains(p)) {
        return false;
    }
    let retryable = [
        "429",
        "too many requests",
        "rate limit",
        "timeout",
        "timed out",
        "temporar",
        "connection",
        "network",
        "unavailable",
        "server error",
        "500",
        "502",
        "503",
        "504",
        "reset by peer",
        "eof",
    ];
    retryable.iter().any(|p| lower.contains(p))
}

/// Exponential backoff for the given retry index (1-based), capped.
pub(crate) fn backoff_ms(policy: &RetryPolicy, retry_index: usize) -> u64 {
    let initial = policy.initial_backoff_ms;
    let cap = policy.max_backoff_ms.max(initial);
    if retry_index <= 1 {
        return initial.min(cap);
    }
    let shift = (retry_index - 2).min(20) as u32;
    let factor = 2u64.checked_shl(shift).unwrap_or(u64::MAX);
    initial.saturating_mul(factor).min(cap)
}

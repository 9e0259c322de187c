// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Deadlines built from configured durations.

use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for "never" when a configured duration does not fit in an
/// `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `from + after`, capped instead of overflowing.
pub fn deadline_after(from: Instant, after: Duration) -> Instant {
    from.checked_add(after)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_duration_is_added() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
    }

    #[test]
    fn test_huge_duration_is_capped() {
        let now = Instant::now();
        let deadline = deadline_after(now, Duration::MAX);
        assert!(deadline > now + Duration::from_secs(86_400 * 365));
    }
}

use std::time::Duration;

use time::OffsetDateTime;
use tracing::warn;

use crate::dao::{local_cache::ScoreCache, score_store::ScoreStore};

/// Per-actor throttle combining the local and the remote cooldown ledgers.
///
/// The stricter of the two wins, so neither wiping the device cache nor moving
/// to another device lifts a cooldown that is still running elsewhere.
#[derive(Debug, Clone, Copy)]
pub struct CooldownGuard {
    window: Duration,
}

impl CooldownGuard {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Remaining wait after a mutation at `last`, clamped to `[0, window]`.
    ///
    /// A timestamp ahead of `now` counts as a mutation that just happened.
    pub fn remaining_since(&self, last: Option<OffsetDateTime>, now: OffsetDateTime) -> Duration {
        let Some(last) = last else {
            return Duration::ZERO;
        };
        let elapsed = now - last;
        if elapsed.is_negative() {
            return self.window;
        }
        self.window.saturating_sub(elapsed.unsigned_abs())
    }

    /// Remaining wait for `actor`, consulting the cache and, when given, the store.
    ///
    /// An unreadable remote ledger counts as no record.
    pub async fn remaining(
        &self,
        actor: &str,
        now: OffsetDateTime,
        cache: &ScoreCache,
        store: Option<&dyn ScoreStore>,
    ) -> Duration {
        let local = self.remaining_since(cache.cooldown(actor), now);

        let remote = match store {
            Some(store) => match store.get_cooldown(actor).await {
                Ok(last) => self.remaining_since(last, now),
                Err(err) => {
                    warn!(actor, error = %err, "remote cooldown unreadable; using local ledger only");
                    Duration::ZERO
                }
            },
            None => Duration::ZERO,
        };

        local.max(remote)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::datetime;

    use super::*;
    use crate::{
        dao::{local_cache::MemoryCache, score_store::memory::MemoryScoreStore},
        domain::score::CooldownRecord,
    };

    const WINDOW: Duration = Duration::from_secs(300);

    fn cache() -> ScoreCache {
        ScoreCache::new(Arc::new(MemoryCache::new()), 10)
    }

    #[test]
    fn no_record_means_no_wait() {
        let guard = CooldownGuard::new(WINDOW);
        assert_eq!(
            guard.remaining_since(None, datetime!(2026-10-19 12:00 UTC)),
            Duration::ZERO
        );
    }

    #[test]
    fn remaining_shrinks_with_elapsed_time_and_bottoms_out() {
        let guard = CooldownGuard::new(WINDOW);
        let last = Some(datetime!(2026-10-19 12:00 UTC));

        assert_eq!(guard.remaining_since(last, datetime!(2026-10-19 12:00 UTC)), WINDOW);
        assert_eq!(
            guard.remaining_since(last, datetime!(2026-10-19 12:01 UTC)),
            Duration::from_secs(240)
        );
        assert_eq!(
            guard.remaining_since(last, datetime!(2026-10-19 13:00 UTC)),
            Duration::ZERO
        );
    }

    #[test]
    fn future_timestamps_are_clamped_to_the_window() {
        let guard = CooldownGuard::new(WINDOW);
        let last = Some(datetime!(2026-10-19 12:30 UTC));
        assert_eq!(guard.remaining_since(last, datetime!(2026-10-19 12:00 UTC)), WINDOW);
    }

    #[test]
    fn remaining_never_increases_between_mutations() {
        let guard = CooldownGuard::new(WINDOW);
        let last = Some(datetime!(2026-10-19 12:00 UTC));
        let mut previous = WINDOW;
        for second in 0..400 {
            let now = datetime!(2026-10-19 12:00 UTC) + Duration::from_secs(second);
            let remaining = guard.remaining_since(last, now);
            assert!(remaining <= previous);
            previous = remaining;
        }
    }

    #[tokio::test]
    async fn remote_ledger_wins_when_stricter() {
        let guard = CooldownGuard::new(WINDOW);
        let cache = cache();
        let store = MemoryScoreStore::new();
        cache
            .set_cooldown("10.0.0.1", datetime!(2026-10-19 11:58 UTC))
            .unwrap();
        store
            .set_cooldown(CooldownRecord {
                actor: "10.0.0.1".into(),
                last_mutation_at: datetime!(2026-10-19 11:59 UTC),
            })
            .await
            .unwrap();

        let remaining = guard
            .remaining("10.0.0.1", datetime!(2026-10-19 12:00 UTC), &cache, Some(&store))
            .await;

        assert_eq!(remaining, Duration::from_secs(240));
    }

    #[tokio::test]
    async fn unreachable_store_leaves_local_ledger_in_charge() {
        let guard = CooldownGuard::new(WINDOW);
        let cache = cache();
        let store = MemoryScoreStore::new();
        store.set_reachable(false);
        cache
            .set_cooldown("10.0.0.1", datetime!(2026-10-19 11:59 UTC))
            .unwrap();

        let remaining = guard
            .remaining("10.0.0.1", datetime!(2026-10-19 12:00 UTC), &cache, Some(&store))
            .await;

        assert_eq!(remaining, Duration::from_secs(240));
    }
}

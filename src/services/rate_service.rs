use std::{sync::Arc, time::Duration};

use time::{Date, OffsetDateTime, UtcOffset};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::{
    clock::Clock,
    dao::local_cache::ScoreCache,
    domain::{rate::snapshot_for, score::RateSnapshot},
    state::{FeedEvent, FeedHub},
};

/// Derives today's rate for this node and remembers the last one handed out.
#[derive(Clone)]
pub struct RateService {
    offset: UtcOffset,
    cache: ScoreCache,
}

impl RateService {
    pub fn new(offset: UtcOffset, cache: ScoreCache) -> Self {
        Self { offset, cache }
    }

    /// Calendar date at `now` in the configured local offset.
    pub fn local_date(&self, now: OffsetDateTime) -> Date {
        now.to_offset(self.offset).date()
    }

    /// Rate snapshot valid at `now`, recorded in the cache as the last known one.
    ///
    /// Always recomputed, so a mutation right after local midnight already
    /// uses the new day's rate.
    pub fn snapshot_at(&self, now: OffsetDateTime) -> RateSnapshot {
        let snapshot = snapshot_for(self.local_date(now));
        if self.cache.rate() != Some(snapshot) {
            if let Err(err) = self.cache.set_rate(&snapshot) {
                warn!(error = %err, "failed to cache rate snapshot");
            }
        }
        snapshot
    }

    /// Snapshot last recorded in the cache, possibly from an earlier day.
    pub fn last_known(&self) -> Option<RateSnapshot> {
        self.cache.rate()
    }

    /// Return the new snapshot when the local date moved past `current`.
    pub fn check_rollover(
        &self,
        now: OffsetDateTime,
        current: &mut Option<Date>,
    ) -> Option<RateSnapshot> {
        let today = self.local_date(now);
        if *current == Some(today) {
            return None;
        }
        let previous = current.replace(today);
        let snapshot = self.snapshot_at(now);
        previous.map(|_| snapshot)
    }
}

/// Poll the clock and announce each new day's rate on the change feed.
pub async fn run_rollover(
    rates: RateService,
    clock: Arc<dyn Clock>,
    feed: Arc<FeedHub>,
    poll: Duration,
) {
    let mut current = rates.last_known().map(|snapshot| snapshot.computed_for);
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Some(snapshot) = rates.check_rollover(clock.now(), &mut current) {
            info!(
                rate = snapshot.value,
                date = %snapshot.computed_for,
                "rate rolled over"
            );
            feed.publish(FeedEvent::Rate(snapshot));
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime, offset};

    use super::*;
    use crate::dao::local_cache::MemoryCache;

    fn service(offset: UtcOffset) -> RateService {
        RateService::new(offset, ScoreCache::new(Arc::new(MemoryCache::new()), 10))
    }

    #[test]
    fn local_date_follows_the_offset() {
        let rates = service(offset!(+2));
        assert_eq!(
            rates.local_date(datetime!(2026-10-19 23:30 UTC)),
            date!(2026 - 10 - 20)
        );
    }

    #[test]
    fn snapshot_is_remembered_as_last_known() {
        let rates = service(UtcOffset::UTC);
        assert_eq!(rates.last_known(), None);

        let snapshot = rates.snapshot_at(datetime!(2026-10-19 08:00 UTC));

        assert_eq!(snapshot.computed_for, date!(2026 - 10 - 19));
        assert_eq!(rates.last_known(), Some(snapshot));
    }

    #[test]
    fn rollover_fires_only_on_date_change() {
        let rates = service(UtcOffset::UTC);
        let mut current = None;

        assert_eq!(
            rates.check_rollover(datetime!(2026-10-19 23:59 UTC), &mut current),
            None
        );
        assert_eq!(
            rates.check_rollover(datetime!(2026-10-19 23:59:59 UTC), &mut current),
            None
        );

        let next = rates
            .check_rollover(datetime!(2026-10-20 00:00:01 UTC), &mut current)
            .unwrap();
        assert_eq!(next.computed_for, date!(2026 - 10 - 20));
        assert_eq!(current, Some(date!(2026 - 10 - 20)));
    }

    #[tokio::test]
    async fn ticker_publishes_rate_changes() {
        let rates = service(UtcOffset::UTC);
        rates.snapshot_at(datetime!(2026-10-19 23:59 UTC));
        let clock = Arc::new(crate::clock::ManualClock::new(datetime!(2026-10-20 00:00:05 UTC)));
        let feed = Arc::new(FeedHub::new(4));
        let mut receiver = feed.subscribe();

        let task = tokio::spawn(run_rollover(
            rates,
            clock,
            feed.clone(),
            Duration::from_secs(30),
        ));

        match receiver.recv().await.unwrap() {
            FeedEvent::Rate(snapshot) => assert_eq!(snapshot.computed_for, date!(2026 - 10 - 20)),
            other => panic!("unexpected event {other:?}"),
        }
        task.abort();
    }
}

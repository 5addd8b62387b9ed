use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use tracing::{debug, info};

use crate::constants::LAMPORTS_PER_SOL;
use crate::context::Context;
use crate::error::TrackerError;
use crate::storage::{self, KeyValueStore, KEY_CHUNK, KEY_TRACKED_AMM};

#[derive(Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub async fn notified(&self) {
        if self.is_shutdown() {
            return;
        }
        self.notify.notified().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackingStatus {
    NotTracked,
    Pause,
    TrackedTriggerOnly,
    TrackedBoth,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::NotTracked => "NOT_TRACKED",
            TrackingStatus::Pause => "PAUSE",
            TrackingStatus::TrackedTriggerOnly => "TRACKED_TRIGGER_ONLY",
            TrackingStatus::TrackedBoth => "TRACKED_BOTH",
        }
    }

    pub fn is_tracked(&self) -> bool {
        matches!(
            self,
            TrackingStatus::TrackedTriggerOnly | TrackingStatus::TrackedBoth
        )
    }
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackingStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_TRACKED" => Ok(TrackingStatus::NotTracked),
            "PAUSE" => Ok(TrackingStatus::Pause),
            "TRACKED_TRIGGER_ONLY" => Ok(TrackingStatus::TrackedTriggerOnly),
            "TRACKED_BOTH" => Ok(TrackingStatus::TrackedBoth),
            other => Err(TrackerError::InvalidTrackingStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracker {
    pub venue_id: Pubkey,
    pub status: TrackingStatus,
    pub last_updated: i64,
}

/// Stored form; the status stays textual so a bad record surfaces as `InvalidTrackingStatus`.
#[derive(Serialize, Deserialize)]
struct TrackerRecord {
    venue_id: String,
    status: String,
    last_updated: i64,
}

impl TryFrom<TrackerRecord> for Tracker {
    type Error = TrackerError;

    fn try_from(rec: TrackerRecord) -> Result<Self, Self::Error> {
        let venue_id = Pubkey::from_str(&rec.venue_id)
            .map_err(|_| TrackerError::InvalidVenueId(rec.venue_id.clone()))?;
        Ok(Tracker {
            venue_id,
            status: rec.status.parse()?,
            last_updated: rec.last_updated,
        })
    }
}

/// Staged liquidation ledger for one venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenChunk {
    pub total: u128,
    pub remaining: u128,
    pub chunk: u128,
}

impl TokenChunk {
    pub fn new(total: u128, splitter: u64) -> Self {
        Self {
            total,
            remaining: total,
            chunk: total / u128::from(splitter.max(1)),
        }
    }

    /// Saturating decrement; returns true once nothing remains.
    pub fn consume(&mut self, amount: u128) -> bool {
        self.remaining = self.remaining.saturating_sub(amount);
        self.remaining == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    Opened(TokenChunk),
    Decremented(TokenChunk),
    Exhausted,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct TrackingPolicy {
    pub chunk_splitter: u64,
    pub liquidity_floor: u64,
    /// State a NOT_TRACKED venue enters once its liquidity is drained.
    pub withdraw_mode: TrackingStatus,
    pub withdraw_settle: Duration,
}

impl Default for TrackingPolicy {
    fn default() -> Self {
        Self {
            chunk_splitter: 50,
            liquidity_floor: LAMPORTS_PER_SOL,
            withdraw_mode: TrackingStatus::TrackedTriggerOnly,
            withdraw_settle: Duration::from_millis(500),
        }
    }
}

pub fn on_initialize(current: TrackingStatus) -> Option<TrackingStatus> {
    if current.is_tracked() {
        Some(TrackingStatus::Pause)
    } else {
        None
    }
}

pub fn on_withdraw(
    current: TrackingStatus,
    native_reserve: u64,
    policy: &TrackingPolicy,
) -> Option<TrackingStatus> {
    if native_reserve > policy.liquidity_floor {
        return None;
    }
    match current {
        TrackingStatus::Pause => Some(TrackingStatus::TrackedBoth),
        TrackingStatus::NotTracked => Some(policy.withdraw_mode),
        _ => None,
    }
}

/// Holds a venue's lock; the map entry goes away with the last holder.
struct VenueGuard<'a> {
    locks: &'a DashMap<Pubkey, Arc<Mutex<()>>>,
    venue: Pubkey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for VenueGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.venue, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Per-venue tracking status and liquidation ledger, persisted in the key-value store.
pub struct Tracking {
    kv: Arc<dyn KeyValueStore>,
    policy: TrackingPolicy,
    venue_locks: DashMap<Pubkey, Arc<Mutex<()>>>,
}

impl Tracking {
    pub fn new(ctx: &Context, policy: TrackingPolicy) -> Self {
        Self {
            kv: ctx.kv.clone(),
            policy,
            venue_locks: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &TrackingPolicy {
        &self.policy
    }

    async fn lock_venue(&self, venue: &Pubkey) -> VenueGuard<'_> {
        let lock = self
            .venue_locks
            .entry(*venue)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        VenueGuard {
            locks: &self.venue_locks,
            venue: *venue,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Absent records read as NOT_TRACKED.
    pub async fn tracker(&self, venue: &Pubkey) -> Result<Tracker, TrackerError> {
        let rec: Option<TrackerRecord> =
            storage::get_json(self.kv.as_ref(), &venue.to_string(), KEY_TRACKED_AMM).await?;
        match rec {
            Some(rec) => rec.try_into(),
            None => Ok(Tracker {
                venue_id: *venue,
                status: TrackingStatus::NotTracked,
                last_updated: 0,
            }),
        }
    }

    pub async fn status(&self, venue: &Pubkey) -> Result<TrackingStatus, TrackerError> {
        Ok(self.tracker(venue).await?.status)
    }

    pub async fn set_status(
        &self,
        venue: &Pubkey,
        status: TrackingStatus,
    ) -> Result<(), TrackerError> {
        let rec = TrackerRecord {
            venue_id: venue.to_string(),
            status: status.as_str().to_string(),
            last_updated: Utc::now().timestamp_millis(),
        };
        storage::set_json(self.kv.as_ref(), &venue.to_string(), KEY_TRACKED_AMM, &rec).await?;
        Ok(())
    }

    /// Writes a status given by name, rejecting anything outside the four known states.
    pub async fn set_status_named(&self, venue: &Pubkey, name: &str) -> Result<(), TrackerError> {
        let status: TrackingStatus = name.parse()?;
        self.set_status(venue, status).await
    }

    pub async fn all_trackers(&self) -> Result<Vec<Tracker>, TrackerError> {
        let keys = self.kv.keys_with_field(KEY_TRACKED_AMM).await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let rec: Option<TrackerRecord> =
                storage::get_json(self.kv.as_ref(), &key, KEY_TRACKED_AMM).await?;
            if let Some(rec) = rec {
                out.push(rec.try_into()?);
            }
        }
        Ok(out)
    }

    pub async fn chunk(&self, venue: &Pubkey) -> Result<Option<TokenChunk>, TrackerError> {
        Ok(storage::get_json(self.kv.as_ref(), &venue.to_string(), KEY_CHUNK).await?)
    }

    async fn save_chunk(&self, venue: &Pubkey, chunk: &TokenChunk) -> Result<(), TrackerError> {
        storage::set_json(self.kv.as_ref(), &venue.to_string(), KEY_CHUNK, chunk).await?;
        Ok(())
    }

    /// Initialize2 on a tracked venue pauses it.
    pub async fn handle_initialize(
        &self,
        venue: &Pubkey,
    ) -> Result<Option<TrackingStatus>, TrackerError> {
        let _guard = self.lock_venue(venue).await;

        let current = self.status(venue).await?;
        let next = on_initialize(current);
        if let Some(next) = next {
            self.set_status(venue, next).await?;
            info!("{venue} | initialize2: {current} -> {next}");
        }
        Ok(next)
    }

    /// Applies the drained-liquidity rule given the native reserve read after settling.
    pub async fn handle_withdraw(
        &self,
        venue: &Pubkey,
        native_reserve: u64,
    ) -> Result<Option<TrackingStatus>, TrackerError> {
        let _guard = self.lock_venue(venue).await;

        let current = self.status(venue).await?;
        let next = on_withdraw(current, native_reserve, &self.policy);
        match next {
            Some(next) => {
                self.set_status(venue, next).await?;
                info!("{venue} | withdraw drained to {native_reserve}: {current} -> {next}");
            }
            None => debug!("{venue} | withdraw reserve {native_reserve}, stays {current}"),
        }
        Ok(next)
    }

    /// Opens or draws down the ledger for a swap signed by this bot.
    pub async fn handle_self_swap(
        &self,
        venue: &Pubkey,
        traded: u128,
        succeeded: bool,
    ) -> Result<LedgerOutcome, TrackerError> {
        if !succeeded || traded == 0 {
            return Ok(LedgerOutcome::Skipped);
        }

        let _guard = self.lock_venue(venue).await;

        match self.chunk(venue).await? {
            None => {
                let chunk = TokenChunk::new(traded, self.policy.chunk_splitter);
                self.save_chunk(venue, &chunk).await?;
                self.set_status(venue, TrackingStatus::TrackedBoth).await?;
                info!(
                    "{venue} | ledger opened total={} chunk={}",
                    chunk.total, chunk.chunk
                );
                Ok(LedgerOutcome::Opened(chunk))
            }
            Some(mut chunk) => {
                if chunk.consume(traded) {
                    self.kv.hdel(&venue.to_string(), KEY_CHUNK).await?;
                    self.set_status(venue, TrackingStatus::NotTracked).await?;
                    info!("{venue} | ledger exhausted, venue released");
                    Ok(LedgerOutcome::Exhausted)
                } else {
                    self.save_chunk(venue, &chunk).await?;
                    debug!("{venue} | ledger remaining={}", chunk.remaining);
                    Ok(LedgerOutcome::Decremented(chunk))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_with, FakeRpc};
    use proptest::prelude::*;
    use TrackingStatus::*;

    fn tracking() -> Tracking {
        let ctx = context_with(FakeRpc::default()).unwrap();
        Tracking::new(&ctx, TrackingPolicy::default())
    }

    #[test]
    fn ledger_arithmetic() {
        let mut chunk = TokenChunk::new(1000, 10);
        assert_eq!(chunk.chunk, 100);
        assert_eq!(chunk.remaining, 1000);

        assert!(!chunk.consume(100));
        assert_eq!(chunk.remaining, 900);
        assert!(!chunk.consume(800));
        assert_eq!(chunk.remaining, 100);
        assert!(chunk.consume(250));
        assert_eq!(chunk.remaining, 0);
    }

    #[test]
    fn initialize_transitions() {
        assert_eq!(on_initialize(TrackedTriggerOnly), Some(Pause));
        assert_eq!(on_initialize(TrackedBoth), Some(Pause));
        assert_eq!(on_initialize(NotTracked), None);
        assert_eq!(on_initialize(Pause), None);
    }

    #[test]
    fn withdraw_transitions() {
        let policy = TrackingPolicy::default();
        let floor = policy.liquidity_floor;
        assert_eq!(on_withdraw(Pause, floor + 1, &policy), None);
        assert_eq!(on_withdraw(Pause, floor, &policy), Some(TrackedBoth));
        assert_eq!(on_withdraw(NotTracked, 0, &policy), Some(TrackedTriggerOnly));
        assert_eq!(on_withdraw(TrackedBoth, 0, &policy), None);

        let both = TrackingPolicy {
            withdraw_mode: TrackedBoth,
            ..TrackingPolicy::default()
        };
        assert_eq!(on_withdraw(NotTracked, 0, &both), Some(TrackedBoth));
    }

    #[test]
    fn status_names() {
        for status in [NotTracked, Pause, TrackedTriggerOnly, TrackedBoth] {
            assert_eq!(status.as_str().parse::<TrackingStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
        assert!(matches!(
            "TRACKED".parse::<TrackingStatus>(),
            Err(TrackerError::InvalidTrackingStatus(s)) if s == "TRACKED"
        ));
    }

    #[tokio::test]
    async fn absent_record_reads_not_tracked() {
        let t = tracking();
        let venue = Pubkey::new_unique();
        assert_eq!(t.status(&venue).await.unwrap(), NotTracked);
        assert!(t.all_trackers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_status_write_is_rejected() {
        let t = tracking();
        let venue = Pubkey::new_unique();
        assert!(matches!(
            t.set_status_named(&venue, "WATCHING").await,
            Err(TrackerError::InvalidTrackingStatus(_))
        ));
        assert_eq!(t.status(&venue).await.unwrap(), NotTracked);

        t.set_status_named(&venue, "PAUSE").await.unwrap();
        assert_eq!(t.status(&venue).await.unwrap(), Pause);
    }

    #[tokio::test]
    async fn corrupt_stored_status_surfaces() {
        let t = tracking();
        let venue = Pubkey::new_unique();
        let raw = format!(
            r#"{{"venue_id":"{venue}","status":"BOGUS","last_updated":1}}"#
        );
        t.kv.hset(&venue.to_string(), KEY_TRACKED_AMM, raw)
            .await
            .unwrap();
        assert!(matches!(
            t.status(&venue).await,
            Err(TrackerError::InvalidTrackingStatus(_))
        ));
    }

    #[tokio::test]
    async fn initialize_pauses_tracked_venue() {
        let t = tracking();
        let venue = Pubkey::new_unique();
        t.set_status(&venue, TrackedTriggerOnly).await.unwrap();
        assert_eq!(t.handle_initialize(&venue).await.unwrap(), Some(Pause));
        assert_eq!(t.status(&venue).await.unwrap(), Pause);

        let trackers = t.all_trackers().await.unwrap();
        assert_eq!(trackers.len(), 1);
        assert_eq!(trackers[0].venue_id, venue);
        assert!(trackers[0].last_updated > 0);
    }

    #[tokio::test]
    async fn self_swap_ledger_lifecycle() {
        let t = tracking();
        let venue = Pubkey::new_unique();

        assert_eq!(
            t.handle_self_swap(&venue, 1000, false).await.unwrap(),
            LedgerOutcome::Skipped
        );
        assert_eq!(t.chunk(&venue).await.unwrap(), None);

        let opened = t.handle_self_swap(&venue, 1000, true).await.unwrap();
        assert!(matches!(opened, LedgerOutcome::Opened(c) if c.total == 1000 && c.chunk == 20));
        assert_eq!(t.status(&venue).await.unwrap(), TrackedBoth);

        // failed sell leaves the ledger untouched
        t.handle_self_swap(&venue, 400, false).await.unwrap();
        assert_eq!(t.chunk(&venue).await.unwrap().unwrap().remaining, 1000);

        let dec = t.handle_self_swap(&venue, 400, true).await.unwrap();
        assert!(matches!(dec, LedgerOutcome::Decremented(c) if c.remaining == 600));

        assert_eq!(
            t.handle_self_swap(&venue, 700, true).await.unwrap(),
            LedgerOutcome::Exhausted
        );
        assert_eq!(t.chunk(&venue).await.unwrap(), None);
        assert_eq!(t.status(&venue).await.unwrap(), NotTracked);
    }

    #[tokio::test]
    async fn venue_locks_are_released_after_use() {
        let t = tracking();
        for _ in 0..500 {
            let venue = Pubkey::new_unique();
            t.handle_initialize(&venue).await.unwrap();
            t.handle_withdraw(&venue, u64::MAX).await.unwrap();
        }
        let venue = Pubkey::new_unique();
        t.handle_self_swap(&venue, 1000, true).await.unwrap();
        assert_eq!(t.venue_locks.len(), 0);
    }

    #[tokio::test]
    async fn unparsable_stored_venue_id_is_reported() {
        let t = tracking();
        let venue = Pubkey::new_unique();
        let raw = r#"{"venue_id":"not-a-key","status":"PAUSE","last_updated":1}"#;
        t.kv.hset(&venue.to_string(), KEY_TRACKED_AMM, raw.to_string())
            .await
            .unwrap();
        assert!(matches!(
            t.status(&venue).await,
            Err(TrackerError::InvalidVenueId(id)) if id == "not-a-key"
        ));
    }

    proptest! {
        #[test]
        fn ledger_remaining_tracks_the_sum(sells in proptest::collection::vec(1u128..400, 0..12)) {
            let mut chunk = TokenChunk::new(1000, 50);
            let mut sold = 0u128;
            for sell in sells {
                sold += sell;
                let exhausted = chunk.consume(sell);
                prop_assert_eq!(chunk.remaining, 1000u128.saturating_sub(sold));
                prop_assert_eq!(exhausted, sold >= 1000);
            }
        }

        #[test]
        fn stored_ledger_follows_successful_sells(
            sells in proptest::collection::vec((1u128..400, any::<bool>()), 0..12)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let t = tracking();
                let venue = Pubkey::new_unique();
                t.handle_self_swap(&venue, 1000, true).await.unwrap();

                let mut remaining = 1000u128;
                for (sell, ok) in sells {
                    t.handle_self_swap(&venue, sell, ok).await.unwrap();
                    if ok {
                        remaining = remaining.saturating_sub(sell);
                    }
                    if remaining == 0 {
                        assert_eq!(t.chunk(&venue).await.unwrap(), None);
                        assert_eq!(t.status(&venue).await.unwrap(), NotTracked);
                        break;
                    }
                    assert_eq!(t.chunk(&venue).await.unwrap().unwrap().remaining, remaining);
                }
            });
        }
    }

    #[tokio::test]
    async fn concurrent_decrements_are_serialized() {
        let t = Arc::new(tracking());
        let venue = Pubkey::new_unique();
        t.handle_self_swap(&venue, 1000, true).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..9 {
            let t = t.clone();
            handles.push(tokio::spawn(async move {
                t.handle_self_swap(&venue, 100, true).await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(t.chunk(&venue).await.unwrap().unwrap().remaining, 100);
    }
}

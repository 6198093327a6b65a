//! `BannerRotator`: the serving-side coordinator.
//!
//! Every request resolves a segment, asks the engine, and on
//! `UnknownSegment` reloads the whole engine from the store and retries
//! exactly once. Structural mutations go to the store first and reload the
//! engine only when the store accepted them.

use crate::emitter::EventEmitter;
use parking_lot::RwLock;
use rotator_core::error::{require_description, require_id, require_page_url};
use rotator_core::store::Repositories;
use rotator_core::types::{Banner, BannerStat, EventType, PageStat, Slot, SlotStat};
use rotator_core::{Event, RotatorError, RotatorResult, SegmentKey, Snapshot};
use rotator_engine::DecisionEngine;
use rotator_segmentation::SegmentResolver;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct BannerRotator {
    repos: Repositories,
    engine: Arc<dyn DecisionEngine>,
    resolver: RwLock<SegmentResolver>,
    /// Serializes reloads so an older snapshot never replaces a newer one.
    reload: Mutex<()>,
    /// Reloads started so far, bumped under `reload`.
    reloads: AtomicU64,
    emitter: EventEmitter,
}

impl BannerRotator {
    pub fn new(repos: Repositories, engine: Arc<dyn DecisionEngine>, emitter: EventEmitter) -> Self {
        info!(algorithm = engine.name(), "Banner rotator created");
        Self {
            repos,
            engine,
            resolver: RwLock::new(SegmentResolver::default()),
            reload: Mutex::new(()),
            reloads: AtomicU64::new(0),
            emitter,
        }
    }

    pub fn engine(&self) -> &Arc<dyn DecisionEngine> {
        &self.engine
    }

    /// Rebuild the resolver and the engine from the store's current contents.
    pub async fn init(&self) -> RotatorResult<()> {
        let _reload = self.reload.lock().await;
        self.reload_locked().await
    }

    /// Reload unless another reload started after `seen` was read; that one
    /// already read the store after the caller saw a stale view.
    async fn reload_after(&self, seen: u64) -> RotatorResult<()> {
        let _reload = self.reload.lock().await;
        if self.reloads.load(Ordering::Acquire) != seen {
            metrics::counter!("rotator.reloads_skipped").increment(1);
            debug!("Engine already reloaded by a concurrent request");
            return Ok(());
        }
        self.reload_locked().await
    }

    /// Caller holds `reload`.
    async fn reload_locked(&self) -> RotatorResult<()> {
        self.reloads.fetch_add(1, Ordering::AcqRel);
        let start = std::time::Instant::now();

        let groups = self.repos.groups.groups().await?;
        let snapshot = self.load_snapshot().await?;

        *self.resolver.write() = SegmentResolver::new(groups);
        self.engine.initialize(&snapshot);

        metrics::counter!("rotator.reloads").increment(1);
        metrics::histogram!("rotator.reload_duration_us")
            .record(start.elapsed().as_micros() as f64);
        info!(
            pages = snapshot.pages.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Decision engine reloaded from store"
        );
        Ok(())
    }

    async fn load_snapshot(&self) -> RotatorResult<Snapshot> {
        let mut snapshot = Snapshot::default();
        for page in self.repos.pages.pages().await? {
            match self.collect_page(&page.url).await {
                Ok(stat) => snapshot.insert(stat),
                // Removed while the snapshot was being read.
                Err(RotatorError::NotFound(what)) => {
                    debug!(page_url = %page.url, missing = %what, "Skipping vanished page");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(snapshot)
    }

    async fn collect_page(&self, page_url: &str) -> RotatorResult<PageStat> {
        let mut stat = PageStat::new(page_url);
        for slot in self.repos.slots.slots_by_page(page_url).await? {
            let banners = match self.repos.banners.banners_by_slot(page_url, slot.slot_id).await {
                Ok(banners) => banners,
                Err(RotatorError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            let mut slot_stat = SlotStat {
                slot: slot.clone(),
                banners: Default::default(),
            };
            for banner in banners {
                let groups = match self
                    .repos
                    .actions
                    .actions(page_url, slot.slot_id, banner.banner_id)
                    .await
                {
                    Ok(groups) => groups,
                    Err(RotatorError::NotFound(_)) => continue,
                    Err(e) => return Err(e),
                };
                slot_stat
                    .banners
                    .insert(banner.banner_id, BannerStat { banner, groups });
            }
            stat.slots.insert(slot.slot_id, slot_stat);
        }
        Ok(stat)
    }

    fn segment_key(&self, page_url: &str, slot_id: u32, user_age: u32, user_sex: &str) -> SegmentKey {
        self.resolver
            .read()
            .segment_key(page_url, slot_id, user_age, user_sex)
    }

    /// Run `op`; on a stale engine view, reload once and run it again.
    async fn with_reload<T>(&self, op: impl Fn() -> RotatorResult<T>) -> RotatorResult<T> {
        let seen = self.reloads.load(Ordering::Acquire);
        match op() {
            Err(e) if e.is_retryable() => {
                debug!(error = %e, "Engine view is stale, reloading");
                self.reload_after(seen).await?;
                op()
            }
            other => other,
        }
    }

    async fn select_and_show(&self, key: &SegmentKey) -> RotatorResult<u32> {
        let banner_id = self.with_reload(|| self.engine.select_next(key)).await?;
        self.with_reload(|| self.engine.record_show(key, banner_id))
            .await?;
        Ok(banner_id)
    }

    // ─── Serving ──────────────────────────────────────────────────────────

    /// Pick the banner to show next and record the show.
    pub async fn next_banner(
        &self,
        page_url: &str,
        slot_id: u32,
        user_age: u32,
        user_sex: &str,
    ) -> RotatorResult<u32> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;

        let key = self.segment_key(page_url, slot_id, user_age, user_sex);
        match self.select_and_show(&key).await {
            Ok(banner_id) => {
                metrics::counter!("rotator.next_banner").increment(1);
                self.emitter.emit(Event::new(
                    EventType::Show,
                    page_url,
                    slot_id,
                    banner_id,
                    user_age,
                    user_sex,
                ));
                Ok(banner_id)
            }
            Err(e) => {
                metrics::counter!("rotator.serving_errors").increment(1);
                warn!(segment = %key, error = %e, "Next banner failed");
                Err(e)
            }
        }
    }

    /// Record a click on a banner previously shown in this slot.
    pub async fn click_banner(
        &self,
        page_url: &str,
        slot_id: u32,
        banner_id: u32,
        user_age: u32,
        user_sex: &str,
    ) -> RotatorResult<()> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;
        require_id("banner id", banner_id)?;

        let key = self.segment_key(page_url, slot_id, user_age, user_sex);
        if let Err(e) = self
            .with_reload(|| self.engine.record_click(&key, banner_id))
            .await
        {
            metrics::counter!("rotator.serving_errors").increment(1);
            warn!(segment = %key, banner_id = banner_id, error = %e, "Click registration failed");
            return Err(e);
        }

        metrics::counter!("rotator.clicks").increment(1);
        self.emitter.emit(Event::new(
            EventType::Click,
            page_url,
            slot_id,
            banner_id,
            user_age,
            user_sex,
        ));
        Ok(())
    }

    // ─── Structural mutations ─────────────────────────────────────────────

    pub async fn add_slot(&self, page_url: &str, slot_id: u32, description: &str) -> RotatorResult<()> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;
        require_description("slot description", description)?;

        self.repos
            .slot_writer
            .add_slot(page_url, slot_id, description)
            .await?;
        info!(page_url = %page_url, slot_id = slot_id, "Slot added");
        self.init().await
    }

    pub async fn delete_slot(&self, page_url: &str, slot_id: u32) -> RotatorResult<()> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;

        self.repos.slot_writer.delete_slot(page_url, slot_id).await?;
        info!(page_url = %page_url, slot_id = slot_id, "Slot deleted");
        self.init().await
    }

    pub async fn delete_all_slots(&self, page_url: &str) -> RotatorResult<()> {
        require_page_url(page_url)?;

        self.repos.slot_writer.delete_all_slots(page_url).await?;
        info!(page_url = %page_url, "All slots deleted");
        self.init().await
    }

    pub async fn add_banner_to_slot(
        &self,
        page_url: &str,
        slot_id: u32,
        banner_id: u32,
        description: &str,
    ) -> RotatorResult<()> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;
        require_id("banner id", banner_id)?;
        require_description("banner description", description)?;

        self.repos
            .banner_writer
            .add_banner_to_slot(page_url, slot_id, banner_id, description)
            .await?;
        info!(page_url = %page_url, slot_id = slot_id, banner_id = banner_id, "Banner added");
        self.init().await
    }

    pub async fn delete_banner_from_slot(
        &self,
        page_url: &str,
        slot_id: u32,
        banner_id: u32,
    ) -> RotatorResult<()> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;
        require_id("banner id", banner_id)?;

        self.repos
            .banner_writer
            .delete_banner_from_slot(page_url, slot_id, banner_id)
            .await?;
        info!(page_url = %page_url, slot_id = slot_id, banner_id = banner_id, "Banner deleted");
        self.init().await
    }

    pub async fn delete_all_banners_from_slot(&self, page_url: &str, slot_id: u32) -> RotatorResult<()> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;

        self.repos
            .banner_writer
            .delete_all_banners_from_slot(page_url, slot_id)
            .await?;
        info!(page_url = %page_url, slot_id = slot_id, "All banners deleted");
        self.init().await
    }

    // ─── Reads ────────────────────────────────────────────────────────────

    /// Canonical counts for a page, read straight from the store.
    pub async fn page_stat(&self, page_url: &str) -> RotatorResult<PageStat> {
        require_page_url(page_url)?;
        self.collect_page(page_url).await
    }

    pub async fn slots(&self, page_url: &str) -> RotatorResult<Vec<Slot>> {
        require_page_url(page_url)?;
        self.repos.slots.slots_by_page(page_url).await
    }

    pub async fn banners(&self, page_url: &str, slot_id: u32) -> RotatorResult<Vec<Banner>> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;
        self.repos.banners.banners_by_slot(page_url, slot_id).await
    }

    /// False once the emitter has been shut down.
    pub fn is_accepting_events(&self) -> bool {
        self.emitter.is_running()
    }

    /// Flush pending events and stop the emitter.
    pub async fn shutdown(&self) {
        self.emitter.shutdown().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rotator_core::event_bus::{capture_publisher, CapturePublisher};
    use rotator_core::types::Action;
    use rotator_engine::Ucb1Engine;
    use rotator_store::MemoryStore;

    const PAGE: &str = "site.com";

    struct Fixture {
        store: Arc<MemoryStore>,
        publisher: Arc<CapturePublisher>,
        rotator: BannerRotator,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let publisher = capture_publisher();
        let emitter = EventEmitter::spawn(publisher.clone(), 64);
        let rotator = BannerRotator::new(store.repositories(), Arc::new(Ucb1Engine::new()), emitter);
        rotator.init().await.unwrap();
        Fixture {
            store,
            publisher,
            rotator,
        }
    }

    #[tokio::test]
    async fn test_next_banner_records_show_and_emits() {
        let f = fixture().await;
        f.rotator.add_slot(PAGE, 1, "header").await.unwrap();
        f.rotator.add_banner_to_slot(PAGE, 1, 1, "ad1").await.unwrap();

        assert_eq!(f.rotator.next_banner(PAGE, 1, 31, "man").await.unwrap(), 1);

        let key = SegmentKey::new(PAGE, 1, "middle-age man");
        let stats = f.rotator.engine().segment_stats(&key).unwrap();
        assert_eq!(stats.total_tries, 1.0);

        f.rotator.shutdown().await;
        let events = f.publisher.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Show);
        assert_eq!(events[0].banner_id, 1);
        assert_eq!(events[0].user_sex, "man");
    }

    #[tokio::test]
    async fn test_click_records_reward_and_emits() {
        let f = fixture().await;
        f.rotator.add_slot(PAGE, 1, "header").await.unwrap();
        f.rotator.add_banner_to_slot(PAGE, 1, 1, "ad1").await.unwrap();
        f.rotator.add_banner_to_slot(PAGE, 1, 2, "ad2").await.unwrap();

        f.rotator.click_banner(PAGE, 1, 2, 70, "woman").await.unwrap();

        let key = SegmentKey::new(PAGE, 1, "old woman");
        let stats = f.rotator.engine().segment_stats(&key).unwrap();
        assert_eq!(stats.arms[&2].reward, 1.0);
        assert_eq!(stats.total_tries, 0.0);

        f.rotator.shutdown().await;
        assert_eq!(f.publisher.count_type(EventType::Click), 1);
    }

    #[tokio::test]
    async fn test_stale_engine_is_reloaded_and_retried() {
        let f = fixture().await;
        // Mutate the store behind the rotator's back.
        f.store.create_slot(PAGE, 2, "footer").unwrap();
        f.store.create_banner(PAGE, 2, 5, "ad5").unwrap();

        assert_eq!(f.rotator.next_banner(PAGE, 2, 20, "woman").await.unwrap(), 5);
        f.rotator.click_banner(PAGE, 2, 5, 20, "woman").await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_slot_fails_after_one_reload() {
        let f = fixture().await;
        let err = f.rotator.next_banner(PAGE, 9, 20, "man").await.unwrap_err();
        assert!(matches!(err, RotatorError::UnknownSegment(_)));

        f.rotator.add_slot(PAGE, 1, "header").await.unwrap();
        f.rotator.add_banner_to_slot(PAGE, 1, 1, "ad1").await.unwrap();
        let err = f.rotator.click_banner(PAGE, 1, 42, 20, "man").await.unwrap_err();
        assert!(err.is_retryable());

        f.rotator.shutdown().await;
        assert_eq!(f.publisher.count(), 0);
    }

    #[tokio::test]
    async fn test_slot_without_banners_is_unknown() {
        let f = fixture().await;
        f.rotator.add_slot(PAGE, 1, "header").await.unwrap();
        let err = f.rotator.next_banner(PAGE, 1, 31, "man").await.unwrap_err();
        assert!(matches!(err, RotatorError::UnknownSegment(_)));
    }

    #[tokio::test]
    async fn test_validation_happens_before_store() {
        let f = fixture().await;
        assert!(matches!(
            f.rotator.add_slot("", 1, "header").await,
            Err(RotatorError::Validation(_))
        ));
        assert!(matches!(
            f.rotator.add_slot(PAGE, 0, "header").await,
            Err(RotatorError::Validation(_))
        ));
        assert!(matches!(
            f.rotator.add_banner_to_slot(PAGE, 1, 1, "").await,
            Err(RotatorError::Validation(_))
        ));
        assert!(matches!(
            f.rotator.next_banner(PAGE, 0, 31, "man").await,
            Err(RotatorError::Validation(_))
        ));
        assert!(matches!(
            f.rotator.click_banner(PAGE, 1, 0, 31, "man").await,
            Err(RotatorError::Validation(_))
        ));
        assert!(f.store.list_pages().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_mutation_keeps_engine() {
        let f = fixture().await;
        f.rotator.add_slot(PAGE, 1, "header").await.unwrap();
        f.rotator.add_banner_to_slot(PAGE, 1, 1, "ad1").await.unwrap();
        f.rotator.next_banner(PAGE, 1, 31, "man").await.unwrap();

        let err = f.rotator.add_slot(PAGE, 1, "again").await.unwrap_err();
        assert!(matches!(err, RotatorError::AlreadyExists(_)));
        let err = f.rotator.delete_slot(PAGE, 7).await.unwrap_err();
        assert!(matches!(err, RotatorError::NotFound(_)));

        // The in-memory show survives because no reload happened.
        let key = SegmentKey::new(PAGE, 1, "middle-age man");
        assert_eq!(f.rotator.engine().segment_stats(&key).unwrap().total_tries, 1.0);
    }

    #[tokio::test]
    async fn test_deletes_reload_engine() {
        let f = fixture().await;
        f.rotator.add_slot(PAGE, 1, "header").await.unwrap();
        f.rotator.add_banner_to_slot(PAGE, 1, 1, "ad1").await.unwrap();
        f.rotator.add_banner_to_slot(PAGE, 1, 2, "ad2").await.unwrap();

        f.rotator.delete_banner_from_slot(PAGE, 1, 1).await.unwrap();
        assert_eq!(f.rotator.next_banner(PAGE, 1, 31, "man").await.unwrap(), 2);

        f.rotator.delete_all_banners_from_slot(PAGE, 1).await.unwrap();
        assert!(f.rotator.banners(PAGE, 1).await.unwrap().is_empty());
        assert!(f.rotator.next_banner(PAGE, 1, 31, "man").await.is_err());

        f.rotator.add_banner_to_slot(PAGE, 1, 3, "ad3").await.unwrap();
        f.rotator.delete_slot(PAGE, 1).await.unwrap();
        assert!(f.rotator.slots(PAGE).await.unwrap().is_empty());

        f.rotator.add_slot(PAGE, 4, "sidebar").await.unwrap();
        f.rotator.delete_all_slots(PAGE).await.unwrap();
        assert!(f.rotator.slots(PAGE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emission_failure_does_not_fail_request() {
        let f = fixture().await;
        f.rotator.add_slot(PAGE, 1, "header").await.unwrap();
        f.rotator.add_banner_to_slot(PAGE, 1, 1, "ad1").await.unwrap();
        f.publisher.fail_pushes(true);

        assert_eq!(f.rotator.next_banner(PAGE, 1, 31, "man").await.unwrap(), 1);
        f.rotator.click_banner(PAGE, 1, 1, 31, "man").await.unwrap();
        f.rotator.shutdown().await;
        assert_eq!(f.publisher.count(), 0);
    }

    #[tokio::test]
    async fn test_page_stat_reads_canonical_counts() {
        let f = fixture().await;
        f.rotator.add_slot(PAGE, 1, "header").await.unwrap();
        f.rotator.add_banner_to_slot(PAGE, 1, 1, "ad1").await.unwrap();
        f.store
            .increment(EventType::Show, PAGE, 1, 1, "young man")
            .unwrap();

        // Serving does not touch canonical counts.
        f.rotator.next_banner(PAGE, 1, 20, "man").await.unwrap();

        let stat = f.rotator.page_stat(PAGE).await.unwrap();
        let groups = &stat.slots[&1].banners[&1].groups;
        assert_eq!(groups["young man"], Action { clicks: 0, shows: 1 });
        assert_eq!(stat.rows().len(), 7);

        assert!(matches!(
            f.rotator.page_stat("nowhere.com").await,
            Err(RotatorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_request_skips_reload_done_meanwhile() {
        let f = fixture().await;
        let seen = f.rotator.reloads.load(Ordering::Acquire);

        // Another request reloads after this one saw the stale view.
        f.store.create_slot(PAGE, 2, "footer").unwrap();
        f.store.create_banner(PAGE, 2, 5, "ad5").unwrap();
        f.rotator.init().await.unwrap();
        assert_eq!(f.rotator.reloads.load(Ordering::Acquire), seen + 1);

        f.rotator.reload_after(seen).await.unwrap();
        assert_eq!(f.rotator.reloads.load(Ordering::Acquire), seen + 1);

        // Nothing reloaded meanwhile: this one reloads.
        f.rotator.reload_after(seen + 1).await.unwrap();
        assert_eq!(f.rotator.reloads.load(Ordering::Acquire), seen + 2);
        assert_eq!(f.rotator.next_banner(PAGE, 2, 20, "woman").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_stale_requests_share_one_reload() {
        let f = Arc::new(fixture().await);
        f.store.create_slot(PAGE, 2, "footer").unwrap();
        f.store.create_banner(PAGE, 2, 5, "ad5").unwrap();
        let before = f.rotator.reloads.load(Ordering::Acquire);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let f = f.clone();
            tasks.push(tokio::spawn(async move {
                f.rotator.next_banner(PAGE, 2, 20, "woman").await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 5);
        }

        assert_eq!(f.rotator.reloads.load(Ordering::Acquire) - before, 1);
        let key = SegmentKey::new(PAGE, 2, "young woman");
        assert_eq!(f.rotator.engine().segment_stats(&key).unwrap().total_tries, 8.0);
    }

    #[tokio::test]
    async fn test_init_is_repeatable() {
        let f = fixture().await;
        f.rotator.add_slot(PAGE, 1, "header").await.unwrap();
        f.rotator.add_banner_to_slot(PAGE, 1, 1, "ad1").await.unwrap();
        let key = SegmentKey::new(PAGE, 1, "middle-age man");

        let before = f.rotator.engine().segment_stats(&key).unwrap();
        f.rotator.init().await.unwrap();
        f.rotator.init().await.unwrap();
        assert_eq!(f.rotator.engine().segment_stats(&key).unwrap(), before);
    }
}

//! Capability traits of the persisted store.
//!
//! The store holds the canonical schema (pages, slots, banners, groups) and
//! the canonical click/show counters. Consumers take only the capabilities
//! they need as explicit constructor parameters.

use crate::error::RotatorResult;
use crate::types::{Action, Banner, EventType, GroupTable, Page, Slot};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

#[async_trait]
pub trait PageReader: Send + Sync {
    async fn pages(&self) -> RotatorResult<Vec<Page>>;
}

#[async_trait]
pub trait SlotReader: Send + Sync {
    async fn slots_by_page(&self, page_url: &str) -> RotatorResult<Vec<Slot>>;
}

#[async_trait]
pub trait SlotWriter: Send + Sync {
    async fn add_slot(&self, page_url: &str, slot_id: u32, description: &str) -> RotatorResult<()>;
    async fn delete_slot(&self, page_url: &str, slot_id: u32) -> RotatorResult<()>;
    async fn delete_all_slots(&self, page_url: &str) -> RotatorResult<()>;
}

#[async_trait]
pub trait BannerReader: Send + Sync {
    async fn banners_by_slot(&self, page_url: &str, slot_id: u32) -> RotatorResult<Vec<Banner>>;
}

#[async_trait]
pub trait BannerWriter: Send + Sync {
    async fn add_banner_to_slot(
        &self,
        page_url: &str,
        slot_id: u32,
        banner_id: u32,
        description: &str,
    ) -> RotatorResult<()>;
    async fn delete_banner_from_slot(
        &self,
        page_url: &str,
        slot_id: u32,
        banner_id: u32,
    ) -> RotatorResult<()>;
    async fn delete_all_banners_from_slot(&self, page_url: &str, slot_id: u32)
        -> RotatorResult<()>;
}

#[async_trait]
pub trait ActionReader: Send + Sync {
    /// Counts for every configured group, zero-filled where nothing was recorded.
    async fn actions(
        &self,
        page_url: &str,
        slot_id: u32,
        banner_id: u32,
    ) -> RotatorResult<BTreeMap<String, Action>>;
}

#[async_trait]
pub trait ActionWriter: Send + Sync {
    /// Atomically add one click or show to a canonical counter.
    async fn add_action(
        &self,
        event_type: EventType,
        page_url: &str,
        slot_id: u32,
        banner_id: u32,
        group: &str,
    ) -> RotatorResult<()>;
}

#[async_trait]
pub trait GroupReader: Send + Sync {
    async fn groups(&self) -> RotatorResult<GroupTable>;
}

/// The store capabilities the serving path depends on.
#[derive(Clone)]
pub struct Repositories {
    pub pages: Arc<dyn PageReader>,
    pub slots: Arc<dyn SlotReader>,
    pub slot_writer: Arc<dyn SlotWriter>,
    pub banners: Arc<dyn BannerReader>,
    pub banner_writer: Arc<dyn BannerWriter>,
    pub actions: Arc<dyn ActionReader>,
    pub groups: Arc<dyn GroupReader>,
}

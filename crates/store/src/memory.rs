//! In-memory persisted store backed by a schema lock and DashMap counters.
//!
//! Production: replace with a relational store implementing the same
//! capability traits. This provides the same API surface for development
//! and testing.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use rotator_core::error::{require_description, require_id, require_page_url};
use rotator_core::store::{
    ActionReader, ActionWriter, BannerReader, BannerWriter, GroupReader, PageReader,
    Repositories, SlotReader, SlotWriter,
};
use rotator_core::types::{Action, Banner, EventType, GroupTable, Page, Slot};
use rotator_core::{RotatorError, RotatorResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CounterKey {
    page_url: String,
    slot_id: u32,
    banner_id: u32,
    group: String,
}

#[derive(Debug, Clone)]
struct SlotEntry {
    slot: Slot,
    banners: BTreeMap<u32, Banner>,
}

type Schema = BTreeMap<String, BTreeMap<u32, SlotEntry>>;

/// Thread-safe in-memory store for pages, slots, banners, groups and
/// canonical click/show counters.
///
/// Counter increments hold the schema read lock, structural deletes hold
/// the write lock, so a counter never outlives its banner.
pub struct MemoryStore {
    schema: RwLock<Schema>,
    counters: DashMap<CounterKey, Action>,
    groups: GroupTable,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_groups(GroupTable::default())
    }

    pub fn with_groups(groups: GroupTable) -> Self {
        info!(
            groups = groups.groups.len(),
            "Memory store initialized (in-memory, development mode)"
        );
        Self {
            schema: RwLock::new(BTreeMap::new()),
            counters: DashMap::new(),
            groups,
        }
    }

    /// Every capability of this store as trait objects.
    pub fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories {
            pages: self.clone(),
            slots: self.clone(),
            slot_writer: self.clone(),
            banners: self.clone(),
            banner_writer: self.clone(),
            actions: self.clone(),
            groups: self.clone(),
        }
    }

    /// Canonical counts for one (page, slot, banner, group), if any were recorded.
    pub fn counts(&self, page_url: &str, slot_id: u32, banner_id: u32, group: &str) -> Option<Action> {
        let key = CounterKey {
            page_url: page_url.to_string(),
            slot_id,
            banner_id,
            group: group.to_string(),
        };
        self.counters.get(&key).map(|r| *r.value())
    }

    // ─── Pages & slots ─────────────────────────────────────────────────────

    pub fn list_pages(&self) -> Vec<Page> {
        self.schema
            .read()
            .keys()
            .map(|url| Page { url: url.clone() })
            .collect()
    }

    pub fn list_slots(&self, page_url: &str) -> RotatorResult<Vec<Slot>> {
        require_page_url(page_url)?;
        let schema = self.schema.read();
        let slots = schema
            .get(page_url)
            .ok_or_else(|| not_found_page(page_url))?;
        Ok(slots.values().map(|e| e.slot.clone()).collect())
    }

    pub fn create_slot(&self, page_url: &str, slot_id: u32, description: &str) -> RotatorResult<()> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;
        require_description("slot description", description)?;

        let mut schema = self.schema.write();
        let slots = schema.entry(page_url.to_string()).or_default();
        if slots.contains_key(&slot_id) {
            return Err(RotatorError::AlreadyExists(format!(
                "slot {slot_id} on page {page_url}"
            )));
        }
        slots.insert(
            slot_id,
            SlotEntry {
                slot: Slot {
                    slot_id,
                    description: description.to_string(),
                },
                banners: BTreeMap::new(),
            },
        );
        debug!(page_url = %page_url, slot_id = slot_id, "Slot added");
        Ok(())
    }

    pub fn remove_slot(&self, page_url: &str, slot_id: u32) -> RotatorResult<()> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;

        let mut schema = self.schema.write();
        let slots = schema
            .get_mut(page_url)
            .ok_or_else(|| not_found_page(page_url))?;
        if slots.remove(&slot_id).is_none() {
            return Err(not_found_slot(page_url, slot_id));
        }
        self.counters
            .retain(|k, _| !(k.page_url == page_url && k.slot_id == slot_id));
        debug!(page_url = %page_url, slot_id = slot_id, "Slot deleted");
        Ok(())
    }

    pub fn remove_all_slots(&self, page_url: &str) -> RotatorResult<()> {
        require_page_url(page_url)?;

        let mut schema = self.schema.write();
        let slots = schema
            .get_mut(page_url)
            .ok_or_else(|| not_found_page(page_url))?;
        let removed = slots.len();
        slots.clear();
        self.counters.retain(|k, _| k.page_url != page_url);
        debug!(page_url = %page_url, removed = removed, "All slots deleted");
        Ok(())
    }

    // ─── Banners ───────────────────────────────────────────────────────────

    pub fn list_banners(&self, page_url: &str, slot_id: u32) -> RotatorResult<Vec<Banner>> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;
        let schema = self.schema.read();
        let entry = slot_entry(&schema, page_url, slot_id)?;
        Ok(entry.banners.values().cloned().collect())
    }

    pub fn create_banner(
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

        let mut schema = self.schema.write();
        let entry = slot_entry_mut(&mut schema, page_url, slot_id)?;
        if entry.banners.contains_key(&banner_id) {
            return Err(RotatorError::AlreadyExists(format!(
                "banner {banner_id} in slot {slot_id} on page {page_url}"
            )));
        }
        entry.banners.insert(
            banner_id,
            Banner {
                banner_id,
                description: description.to_string(),
            },
        );
        debug!(page_url = %page_url, slot_id = slot_id, banner_id = banner_id, "Banner added");
        Ok(())
    }

    pub fn remove_banner(&self, page_url: &str, slot_id: u32, banner_id: u32) -> RotatorResult<()> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;
        require_id("banner id", banner_id)?;

        let mut schema = self.schema.write();
        let entry = slot_entry_mut(&mut schema, page_url, slot_id)?;
        if entry.banners.remove(&banner_id).is_none() {
            return Err(RotatorError::NotFound(format!(
                "banner {banner_id} in slot {slot_id} on page {page_url}"
            )));
        }
        self.counters.retain(|k, _| {
            !(k.page_url == page_url && k.slot_id == slot_id && k.banner_id == banner_id)
        });
        debug!(page_url = %page_url, slot_id = slot_id, banner_id = banner_id, "Banner deleted");
        Ok(())
    }

    pub fn remove_all_banners(&self, page_url: &str, slot_id: u32) -> RotatorResult<()> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;

        let mut schema = self.schema.write();
        let entry = slot_entry_mut(&mut schema, page_url, slot_id)?;
        entry.banners.clear();
        self.counters
            .retain(|k, _| !(k.page_url == page_url && k.slot_id == slot_id));
        Ok(())
    }

    // ─── Actions ───────────────────────────────────────────────────────────

    pub fn read_actions(
        &self,
        page_url: &str,
        slot_id: u32,
        banner_id: u32,
    ) -> RotatorResult<BTreeMap<String, Action>> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;
        require_id("banner id", banner_id)?;

        let schema = self.schema.read();
        banner_in(&schema, page_url, slot_id, banner_id)?;
        Ok(self
            .groups
            .descriptions()
            .map(|group| {
                let action = self
                    .counts(page_url, slot_id, banner_id, group)
                    .unwrap_or_default();
                (group.to_string(), action)
            })
            .collect())
    }

    pub fn increment(
        &self,
        event_type: EventType,
        page_url: &str,
        slot_id: u32,
        banner_id: u32,
        group: &str,
    ) -> RotatorResult<()> {
        require_page_url(page_url)?;
        require_id("slot id", slot_id)?;
        require_id("banner id", banner_id)?;
        require_description("group", group)?;
        if !self.groups.knows(group) {
            return Err(RotatorError::NotFound(format!("group {group:?}")));
        }

        let schema = self.schema.read();
        banner_in(&schema, page_url, slot_id, banner_id)?;
        let key = CounterKey {
            page_url: page_url.to_string(),
            slot_id,
            banner_id,
            group: group.to_string(),
        };
        let mut action = self.counters.entry(key).or_default();
        match event_type {
            EventType::Click => action.clicks += 1,
            EventType::Show => action.shows += 1,
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found_page(page_url: &str) -> RotatorError {
    RotatorError::NotFound(format!("page {page_url}"))
}

fn not_found_slot(page_url: &str, slot_id: u32) -> RotatorError {
    RotatorError::NotFound(format!("slot {slot_id} on page {page_url}"))
}

fn slot_entry<'a>(schema: &'a Schema, page_url: &str, slot_id: u32) -> RotatorResult<&'a SlotEntry> {
    schema
        .get(page_url)
        .ok_or_else(|| not_found_page(page_url))?
        .get(&slot_id)
        .ok_or_else(|| not_found_slot(page_url, slot_id))
}

fn slot_entry_mut<'a>(
    schema: &'a mut Schema,
    page_url: &str,
    slot_id: u32,
) -> RotatorResult<&'a mut SlotEntry> {
    schema
        .get_mut(page_url)
        .ok_or_else(|| not_found_page(page_url))?
        .get_mut(&slot_id)
        .ok_or_else(|| not_found_slot(page_url, slot_id))
}

fn banner_in<'a>(
    schema: &'a Schema,
    page_url: &str,
    slot_id: u32,
    banner_id: u32,
) -> RotatorResult<&'a Banner> {
    slot_entry(schema, page_url, slot_id)?
        .banners
        .get(&banner_id)
        .ok_or_else(|| {
            RotatorError::NotFound(format!(
                "banner {banner_id} in slot {slot_id} on page {page_url}"
            ))
        })
}

// ─── Capability trait implementations ──────────────────────────────────────

#[async_trait]
impl PageReader for MemoryStore {
    async fn pages(&self) -> RotatorResult<Vec<Page>> {
        Ok(self.list_pages())
    }
}

#[async_trait]
impl SlotReader for MemoryStore {
    async fn slots_by_page(&self, page_url: &str) -> RotatorResult<Vec<Slot>> {
        self.list_slots(page_url)
    }
}

#[async_trait]
impl SlotWriter for MemoryStore {
    async fn add_slot(&self, page_url: &str, slot_id: u32, description: &str) -> RotatorResult<()> {
        self.create_slot(page_url, slot_id, description)
    }

    async fn delete_slot(&self, page_url: &str, slot_id: u32) -> RotatorResult<()> {
        self.remove_slot(page_url, slot_id)
    }

    async fn delete_all_slots(&self, page_url: &str) -> RotatorResult<()> {
        self.remove_all_slots(page_url)
    }
}

#[async_trait]
impl BannerReader for MemoryStore {
    async fn banners_by_slot(&self, page_url: &str, slot_id: u32) -> RotatorResult<Vec<Banner>> {
        self.list_banners(page_url, slot_id)
    }
}

#[async_trait]
impl BannerWriter for MemoryStore {
    async fn add_banner_to_slot(
        &self,
        page_url: &str,
        slot_id: u32,
        banner_id: u32,
        description: &str,
    ) -> RotatorResult<()> {
        self.create_banner(page_url, slot_id, banner_id, description)
    }

    async fn delete_banner_from_slot(
        &self,
        page_url: &str,
        slot_id: u32,
        banner_id: u32,
    ) -> RotatorResult<()> {
        self.remove_banner(page_url, slot_id, banner_id)
    }

    async fn delete_all_banners_from_slot(&self, page_url: &str, slot_id: u32) -> RotatorResult<()> {
        self.remove_all_banners(page_url, slot_id)
    }
}

#[async_trait]
impl ActionReader for MemoryStore {
    async fn actions(
        &self,
        page_url: &str,
        slot_id: u32,
        banner_id: u32,
    ) -> RotatorResult<BTreeMap<String, Action>> {
        self.read_actions(page_url, slot_id, banner_id)
    }
}

#[async_trait]
impl ActionWriter for MemoryStore {
    async fn add_action(
        &self,
        event_type: EventType,
        page_url: &str,
        slot_id: u32,
        banner_id: u32,
        group: &str,
    ) -> RotatorResult<()> {
        self.increment(event_type, page_url, slot_id, banner_id, group)
    }
}

#[async_trait]
impl GroupReader for MemoryStore {
    async fn groups(&self) -> RotatorResult<GroupTable> {
        Ok(self.groups.clone())
    }
}

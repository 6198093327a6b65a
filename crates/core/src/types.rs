use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ─── Schema ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Page {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slot {
    pub slot_id: u32,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Banner {
    pub banner_id: u32,
    pub description: String,
}

/// A demographic range. Both age bounds are inclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub description: String,
    pub sex: String,
    pub min_age: u32,
    pub max_age: u32,
}

impl Group {
    pub fn new(description: &str, sex: &str, min_age: u32, max_age: u32) -> Self {
        Self {
            description: description.to_string(),
            sex: sex.to_string(),
            min_age,
            max_age,
        }
    }

    pub fn contains(&self, user_age: u32, user_sex: &str) -> bool {
        self.sex == user_sex && self.min_age <= user_age && user_age <= self.max_age
    }
}

/// Ordered demographic ranges plus the description used when none matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupTable {
    pub groups: Vec<Group>,
    pub default_description: String,
}

impl GroupTable {
    /// Every description a canonical counter may be keyed by.
    pub fn descriptions(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .map(|g| g.description.as_str())
            .chain(std::iter::once(self.default_description.as_str()))
    }

    pub fn knows(&self, description: &str) -> bool {
        self.descriptions().any(|d| d == description)
    }
}

impl Default for GroupTable {
    fn default() -> Self {
        Self {
            groups: vec![
                Group::new("young man", "man", 0, 30),
                Group::new("young woman", "woman", 0, 30),
                Group::new("middle-age man", "man", 31, 60),
                Group::new("middle-age woman", "woman", 31, 60),
                Group::new("old man", "man", 61, 150),
                Group::new("old woman", "woman", 61, 150),
            ],
            default_description: "unknown age-sex group".to_string(),
        }
    }
}

/// Canonical click/show counts for one (page, slot, banner, group).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Action {
    pub clicks: u64,
    pub shows: u64,
}

// ─── Events ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Click,
    Show,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Click => f.write_str("click"),
            EventType::Show => f.write_str("show"),
        }
    }
}

/// An outcome observed while serving. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    #[serde(default = "Uuid::new_v4")]
    pub event_id: Uuid,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub page_url: String,
    pub slot_id: u32,
    pub banner_id: u32,
    pub user_age: u32,
    pub user_sex: String,
}

impl Event {
    pub fn new(
        event_type: EventType,
        page_url: &str,
        slot_id: u32,
        banner_id: u32,
        user_age: u32,
        user_sex: &str,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            page_url: page_url.to_string(),
            slot_id,
            banner_id,
            user_age,
            user_sex: user_sex.to_string(),
        }
    }
}

// ─── Segments & snapshots ───────────────────────────────────────────────────

/// Identifies one bandit instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentKey {
    pub page_url: String,
    pub slot_id: u32,
    pub group: String,
}

impl SegmentKey {
    pub fn new(page_url: &str, slot_id: u32, group: &str) -> Self {
        Self {
            page_url: page_url.to_string(),
            slot_id,
            group: group.to_string(),
        }
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page {}, slot {}, group {:?}",
            self.page_url, self.slot_id, self.group
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BannerStat {
    pub banner: Banner,
    pub groups: BTreeMap<String, Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotStat {
    pub slot: Slot,
    pub banners: BTreeMap<u32, BannerStat>,
}

/// Canonical counts for every slot, banner and group of one page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageStat {
    pub page_url: String,
    pub slots: BTreeMap<u32, SlotStat>,
}

impl PageStat {
    pub fn new(page_url: &str) -> Self {
        Self {
            page_url: page_url.to_string(),
            slots: BTreeMap::new(),
        }
    }

    /// Flatten into one row per (slot, banner, group).
    pub fn rows(&self) -> Vec<StatRow> {
        let mut rows = Vec::new();
        for (slot_id, slot) in &self.slots {
            for (banner_id, banner) in &slot.banners {
                for (group, action) in &banner.groups {
                    rows.push(StatRow {
                        page_url: self.page_url.clone(),
                        slot_id: *slot_id,
                        banner_id: *banner_id,
                        group: group.clone(),
                        clicks: action.clicks,
                        shows: action.shows,
                    });
                }
            }
        }
        rows
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatRow {
    pub page_url: String,
    pub slot_id: u32,
    pub banner_id: u32,
    pub group: String,
    pub clicks: u64,
    pub shows: u64,
}

/// Full persisted state the decision engine is rebuilt from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub pages: BTreeMap<String, PageStat>,
}

impl Snapshot {
    pub fn insert(&mut self, stat: PageStat) {
        self.pages.insert(stat.page_url.clone(), stat);
    }
}

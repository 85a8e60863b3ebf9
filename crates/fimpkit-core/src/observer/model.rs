// ── Prime component models ──
//
// Known fields only; everything else a hub sends is kept in `extra` so a
// round-trip through the snapshot loses nothing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use strum::{Display, EnumString, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ComponentKind {
    Device,
    Thing,
    Room,
    Area,
}

impl ComponentKind {
    pub const ALL: [Self; 4] = [Self::Device, Self::Thing, Self::Room, Self::Area];

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Display name wrapper used by devices and rooms (`"client": {"name": ..}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientName {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    #[serde(default)]
    pub client: ClientName,
    #[serde(default)]
    pub room: Option<i64>,
    #[serde(default)]
    pub thing: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thing {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub room: Option<i64>,
    #[serde(default)]
    pub devices: Vec<i64>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: i64,
    #[serde(default)]
    pub client: ClientName,
    #[serde(default)]
    pub area: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub area_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// A component set member identified by a numeric id.
pub trait CatalogEntry: Clone + DeserializeOwned + Send + Sync + 'static {
    const KIND: ComponentKind;

    fn id(&self) -> i64;
}

impl CatalogEntry for Device {
    const KIND: ComponentKind = ComponentKind::Device;

    fn id(&self) -> i64 {
        self.id
    }
}

impl CatalogEntry for Thing {
    const KIND: ComponentKind = ComponentKind::Thing;

    fn id(&self) -> i64 {
        self.id
    }
}

impl CatalogEntry for Room {
    const KIND: ComponentKind = ComponentKind::Room;

    fn id(&self) -> i64 {
        self.id
    }
}

impl CatalogEntry for Area {
    const KIND: ComponentKind = ComponentKind::Area;

    fn id(&self) -> i64 {
        self.id
    }
}

/// Point-in-time copy of every component set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub devices: Vec<Device>,
    pub things: Vec<Thing>,
    pub rooms: Vec<Room>,
    pub areas: Vec<Area>,
}

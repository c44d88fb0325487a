use serde::{ Deserialize, Serialize };
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::server::ServerAddress;

/// Stable identity of a loaded group, independent of its list position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for GroupId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Favourites,
    LegacyFavourites,
    Api,
    Backend,
}

impl SourceKind {
    pub fn is_favourites(self) -> bool {
        matches!(self, SourceKind::Favourites | SourceKind::LegacyFavourites)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Favourites => "Favourites",
            SourceKind::LegacyFavourites => "LegacyFavourites",
            SourceKind::Api => "Api",
            SourceKind::Backend => "Backend",
        };
        f.write_str(name)
    }
}

/// A persisted list source entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connector {
    pub name: String,
    pub kind: SourceKind,
    pub endpoint: String,
}

/// One server in a favourites list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavouriteEntry {
    pub address: ServerAddress,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub game_mode: String,
    #[serde(default)]
    pub server_password: String,
    #[serde(default)]
    pub rcon_password: String,
}

/// What the HTTP surface and logs show for a group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub id: GroupId,
    pub position: usize,
    pub name: String,
    pub kind: SourceKind,
    pub endpoint: String,
    pub server_count: u32,
}

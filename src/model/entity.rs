use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Every persisted entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    News,
    Feed,
    Attachment,
    Category,
    Person,
    BookMark,
    SearchMark,
    NewsBin,
    Folder,
    Label,
    SearchCondition,
}

impl EntityKind {
    pub const ALL: [EntityKind; 11] = [
        EntityKind::News,
        EntityKind::Feed,
        EntityKind::Attachment,
        EntityKind::Category,
        EntityKind::Person,
        EntityKind::BookMark,
        EntityKind::SearchMark,
        EntityKind::NewsBin,
        EntityKind::Folder,
        EntityKind::Label,
        EntityKind::SearchCondition,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::News => "news",
            EntityKind::Feed => "feed",
            EntityKind::Attachment => "attachment",
            EntityKind::Category => "category",
            EntityKind::Person => "person",
            EntityKind::BookMark => "book_mark",
            EntityKind::SearchMark => "search_mark",
            EntityKind::NewsBin => "news_bin",
            EntityKind::Folder => "folder",
            EntityKind::Label => "label",
            EntityKind::SearchCondition => "search_condition",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown entity kind: {s}"))
    }
}

/// Identity of a persisted entity: its kind plus its numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Numeric id that can be assigned exactly once.
///
/// Assignment goes through `&self`, so ids can be handed out while the
/// owning entity is only read-locked.
#[derive(Default)]
pub struct EntityId(OnceLock<i64>);

impl EntityId {
    pub fn new() -> Self {
        Self(OnceLock::new())
    }

    pub fn with(id: i64) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(id);
        Self(cell)
    }

    pub fn get(&self) -> Option<i64> {
        self.0.get().copied()
    }

    /// Returns the id, assigning one from `next` if none was set yet.
    pub fn get_or_assign(&self, next: impl FnOnce() -> i64) -> i64 {
        *self.0.get_or_init(next)
    }

    /// Sets the id. Returns `false` (and changes nothing) if one is already set.
    pub fn set(&self, id: i64) -> bool {
        self.0.set(id).is_ok()
    }
}

impl Clone for EntityId {
    fn clone(&self) -> Self {
        match self.get() {
            Some(id) => Self::with(id),
            None => Self::new(),
        }
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(id) => write!(f, "EntityId({id})"),
            None => f.write_str("EntityId(unassigned)"),
        }
    }
}

/// Ids never take part in value equality; two copies of the same category
/// compare equal whether or not one of them has been persisted yet.
impl PartialEq for EntityId {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for EntityId {}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<i64>::deserialize(deserializer)? {
            Some(id) => Self::with(id),
            None => Self::new(),
        })
    }
}

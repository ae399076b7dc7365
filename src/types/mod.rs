//! Public types for the wowstage API.

mod key;
mod payload;
mod record;

pub use key::{DataType, GameVersion, RealmSlug, RecordKey, Region, Target};
pub use payload::{DataRequest, StagedPayload, Tier};
pub use record::{CacheRecord, CollectionLogEntry, CollectionStatus, MAX_TTL, RecordSource};

//! Version selection over a newest-first version chain.
//!
//! Object stores list the versions of a key from the most recent write
//! backwards. Selection walks that order and stops as soon as it crosses the
//! epoch boundary, so the chain is never re-sorted or fully materialised by
//! the selector itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::epoch::Epoch;

/// One entry of a key's version chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRef {
    /// Opaque backend token addressing this version.
    pub version_id: String,
    /// When the backend recorded the write.
    pub last_modified: DateTime<Utc>,
}

impl VersionRef {
    pub fn new(version_id: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self { version_id: version_id.into(), last_modified }
    }
}

/// Pick the version satisfying `epoch` from a newest-first sequence.
///
/// - `Latest` (or `NoHistory`) returns the first entry.
/// - `AsOf(t)` returns the entry just newer than the first one strictly older
///   than `t`. An entry stamped exactly `t` does not stop the scan. When no
///   entry is older than `t`, the oldest entry is returned as the closest
///   approximation.
pub fn select<I>(versions: I, epoch: &Epoch) -> Option<VersionRef>
where
    I: IntoIterator<Item = VersionRef>,
{
    let mut versions = versions.into_iter();
    let first = versions.next()?;

    let Epoch::AsOf(boundary) = epoch else {
        return Some(first);
    };

    let mut candidate = first;
    for version in versions {
        if version.last_modified < *boundary {
            return Some(candidate);
        }
        candidate = version;
    }

    Some(candidate)
}

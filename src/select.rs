//! Latest-file selection: reduce a raw directory listing to one
//! authoritative file per logical slot.
//!
//! Pure function of its input, no I/O. The embedded filename timestamp is
//! the freshness signal, never the listing's own modification time: the
//! filename reflects the source system's publish time.

use indexmap::IndexMap;

use crate::classify::classify;
use crate::model::{ClassifiedFile, FileKey, ListingEntry};

/// Group classified entries by [`FileKey`] and keep the freshest per group.
///
/// Fixed-width zero-padded YYYYMMDDHHmm makes lexicographic compare valid.
/// On a timestamp tie the entry encountered later in input order wins, so
/// re-running over the same listing is deterministic. Output order follows
/// first-seen key order (not significant to consumers, but stable).
pub fn select_latest(entries: &[ListingEntry]) -> Vec<ClassifiedFile> {
    let mut latest: IndexMap<FileKey, ClassifiedFile> = IndexMap::new();
    for entry in entries {
        let Some(candidate) = classify(entry) else {
            continue;
        };
        match latest.entry(candidate.key.clone()) {
            indexmap::map::Entry::Occupied(mut slot) => {
                // >= rather than >: later input position wins ties.
                if candidate.timestamp >= slot.get().timestamp {
                    slot.insert(candidate);
                }
            }
            indexmap::map::Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
        }
    }
    latest.into_values().collect()
}

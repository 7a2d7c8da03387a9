//! Keeps a handle's local index in step with the shared record array.
//!
//! The header carries `has_index`, `index_valid` and a rebuild generation.
//! A shared rebuild happens only under the table lock and moves
//! `index_valid` from false to true exactly once, bumping the generation.
//! Every other handle notices the new generation and rebuilds locally
//! without touching the header.

use eyre::Result;
use tracing::debug;

use crate::index::{CatchUp, PrimaryKeyIndex};
use crate::layout::RecordLayout;
use crate::storage::{BackingRegion, Region};

/// Published records this handle's mapping can read.
pub(crate) fn visible_count(region: &BackingRegion) -> u64 {
    region.header().count().min(region.capacity())
}

/// True when the header advertises a usable index.
pub(crate) fn shared_index_ready(region: &BackingRegion) -> bool {
    let header = region.header();
    header.has_index() && header.index_valid()
}

/// Brings the local index up to the visible count without the lock. Returns
/// false when an out-of-order date was found; the local index is then
/// rebuilt in full.
pub(crate) fn sync_local(region: &BackingRegion, index: &mut PrimaryKeyIndex, layout: &RecordLayout) -> Result<bool> {
    let generation = region.header().generation();
    let count = visible_count(region);

    if !index.is_valid() || index.generation() != generation {
        index.rebuild(region.records(), layout, count, generation);
        return Ok(true);
    }

    match index.catch_up(region.records(), layout, count)? {
        CatchUp::Current(_) => Ok(true),
        CatchUp::OutOfOrder => {
            index.rebuild(region.records(), layout, count, generation);
            Ok(false)
        }
    }
}

/// Full rebuild published through the header. Lock must be held.
pub(crate) fn rebuild_shared(region: &BackingRegion, index: &mut PrimaryKeyIndex, layout: &RecordLayout) {
    let header = region.header();
    header.set_index_valid(false);
    index.invalidate();

    let count = visible_count(region);
    let generation = header.generation() + 1;
    index.rebuild(region.records(), layout, count, generation);

    header.bump_generation();
    header.set_has_index();
    header.set_index_valid(true);

    debug!(count, generation, "shared index rebuilt");
}

/// Makes the shared and local index valid. Lock must be held.
pub(crate) fn ensure_index_locked(
    region: &BackingRegion,
    index: &mut PrimaryKeyIndex,
    layout: &RecordLayout,
) -> Result<()> {
    if !shared_index_ready(region) {
        rebuild_shared(region, index, layout);
        return Ok(());
    }
    if !sync_local(region, index, layout)? {
        rebuild_shared(region, index, layout);
    }
    Ok(())
}

/// Links freshly published records. Only a handle that already holds a valid
/// index pays for it. Lock must be held.
pub(crate) fn sync_after_append(
    region: &BackingRegion,
    index: &mut PrimaryKeyIndex,
    layout: &RecordLayout,
) -> Result<()> {
    if !index.is_valid() || !shared_index_ready(region) {
        return Ok(());
    }
    if !sync_local(region, index, layout)? {
        rebuild_shared(region, index, layout);
    }
    Ok(())
}

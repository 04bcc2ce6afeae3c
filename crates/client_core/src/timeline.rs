//! Ordering rules for the per-session offer timeline.

use shared::domain::Offer;

/// Sorts offers by round ascending. The sort is stable, so the server's
/// order is preserved for equal rounds, and normalizing an already-sorted
/// sequence is a no-op.
pub fn normalize(mut offers: Vec<Offer>) -> Vec<Offer> {
    offers.sort_by_key(|offer| offer.round);
    offers
}

/// Applies a refreshed fetch against the timeline currently held. The
/// timeline is append-only from the client's perspective, so a fetch that
/// comes back shorter than what we already display is discarded.
pub fn merge_refreshed(current: &[Offer], fetched: Vec<Offer>) -> Vec<Offer> {
    let fetched = normalize(fetched);
    if fetched.len() < current.len() {
        return current.to_vec();
    }
    fetched
}

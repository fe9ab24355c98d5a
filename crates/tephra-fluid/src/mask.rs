//! Resident-neighbor bitmask queries.
//!
//! The mask is the single source of truth for "read neighbor" vs. "apply
//! boundary fallback" decisions: advection consults it before redirecting an
//! out-of-bounds sample, and the bound solver's copy/fill branches agree with
//! it by construction.

use tephra_common::{neighbor_index, NEIGHBOR_SLOTS};

/// Computes a 32-bit residency mask from a neighbor slot table.
///
/// Bit `i` is set iff slot `i` is non-empty; bit order matches the 3x3x3 flat
/// neighborhood index. Pure query, no side effects.
#[must_use]
pub fn compute_mask(neighbors: &[Option<usize>; NEIGHBOR_SLOTS]) -> u32 {
    let mut mask = 0;
    for (slot, entry) in neighbors.iter().enumerate() {
        if entry.is_some() {
            mask |= 1 << slot;
        }
    }
    mask
}

/// Returns whether the mask records a resident neighbor in the given slot.
#[must_use]
pub const fn has_slot(mask: u32, slot: usize) -> bool {
    slot < NEIGHBOR_SLOTS && mask & (1 << slot) != 0
}

/// Returns whether the mask records a resident neighbor at the given offset.
#[must_use]
pub const fn has_neighbor(mask: u32, dx: i32, dy: i32, dz: i32) -> bool {
    has_slot(mask, neighbor_index(dx, dy, dz))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tephra_common::NEIGHBOR_CENTER;

    #[test]
    fn test_empty_table_is_zero_mask() {
        let neighbors = [None; NEIGHBOR_SLOTS];
        assert_eq!(compute_mask(&neighbors), 0);
    }

    #[test]
    fn test_mask_bit_positions() {
        let mut neighbors = [None; NEIGHBOR_SLOTS];
        neighbors[NEIGHBOR_CENTER] = Some(0);
        neighbors[neighbor_index(0, 0, 1)] = Some(1);
        let mask = compute_mask(&neighbors);
        assert!(has_neighbor(mask, 0, 0, 0));
        assert!(has_neighbor(mask, 0, 0, 1));
        assert!(!has_neighbor(mask, 0, 0, -1));
        assert!(!has_neighbor(mask, 1, 0, 0));
    }

    proptest! {
        #[test]
        fn prop_mask_agrees_with_slots(present in proptest::collection::vec(any::<bool>(), NEIGHBOR_SLOTS)) {
            let mut neighbors = [None; NEIGHBOR_SLOTS];
            for (slot, &p) in present.iter().enumerate() {
                if p {
                    neighbors[slot] = Some(slot);
                }
            }
            let mask = compute_mask(&neighbors);
            for slot in 0..NEIGHBOR_SLOTS {
                prop_assert_eq!(has_slot(mask, slot), neighbors[slot].is_some());
            }
        }
    }
}

//! Zone selection patterns.
//!
//! Every zone control frame carries one byte per zone: `0x01` if the command
//! applies to that zone, `0x02` if it does not. Selecting several zones in one
//! frame is how the vendor app performs group operations.
//!
//! ```text
//! zone:     1  2  3  4  5  6  7  8
//! pattern: 02 02 01 02 02 02 02 02   -> zone 3 only
//! pattern: 01 01 02 02 02 02 02 02   -> group of zones 1 and 2
//! ```

use crate::error::{MatrioError, Result};
use crate::types::ZoneId;
use bytes::BufMut;
use std::collections::BTreeSet;

/// Pattern byte for a zone the frame applies to.
pub const SELECTED: u8 = 0x01;

/// Pattern byte for a zone the frame leaves alone.
pub const UNSELECTED: u8 = 0x02;

/// Largest zone count a selector can address.
pub const MAX_ZONES: u8 = 16;

/// The set of zones a command or broadcast addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZoneSelector {
    bits: u16,
    zone_count: u8,
}

impl ZoneSelector {
    /// Build a selector for the given zones on a device with `zone_count` zones.
    ///
    /// Fails with [`MatrioError::EmptyZoneSelection`] for an empty set and
    /// [`MatrioError::InvalidZone`] for ids outside `1..=zone_count`.
    ///
    /// ```
    /// use matrio_control::ZoneSelector;
    ///
    /// let selector = ZoneSelector::for_zones([1, 3], 8).unwrap();
    /// assert_eq!(selector.to_pattern(), vec![1, 2, 1, 2, 2, 2, 2, 2]);
    /// ```
    pub fn for_zones<I>(zones: I, zone_count: u8) -> Result<Self>
    where
        I: IntoIterator<Item = ZoneId>,
    {
        let zone_count = zone_count.min(MAX_ZONES);
        let mut bits = 0u16;
        for zone in zones {
            if zone == 0 || zone > zone_count {
                return Err(MatrioError::InvalidZone(zone));
            }
            bits |= 1 << (zone - 1);
        }
        if bits == 0 {
            return Err(MatrioError::EmptyZoneSelection);
        }
        Ok(Self { bits, zone_count })
    }

    /// Select a single zone.
    pub fn single(zone: ZoneId, zone_count: u8) -> Result<Self> {
        Self::for_zones([zone], zone_count)
    }

    /// Select every zone on the device.
    pub fn all(zone_count: u8) -> Self {
        let zone_count = zone_count.min(MAX_ZONES);
        let bits = if zone_count == MAX_ZONES {
            u16::MAX
        } else {
            (1u16 << zone_count) - 1
        };
        Self { bits, zone_count }
    }

    /// Read a selector back from its wire pattern.
    ///
    /// Any byte other than [`SELECTED`] counts as unselected, so a pattern of
    /// all `0x02` yields an empty selector (a frame that changes no zone).
    pub fn from_pattern(pattern: &[u8]) -> Self {
        let pattern = &pattern[..pattern.len().min(MAX_ZONES as usize)];
        let bits = pattern
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == SELECTED)
            .fold(0u16, |acc, (i, _)| acc | (1 << i));
        Self {
            bits,
            zone_count: pattern.len() as u8,
        }
    }

    /// The zones this selector addresses.
    pub fn zones(&self) -> BTreeSet<ZoneId> {
        (1..=self.zone_count).filter(|&z| self.contains(z)).collect()
    }

    pub fn contains(&self, zone: ZoneId) -> bool {
        zone >= 1 && zone <= self.zone_count && self.bits & (1 << (zone - 1)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    pub fn zone_count(&self) -> u8 {
        self.zone_count
    }

    /// Wire pattern, one byte per zone.
    pub fn to_pattern(&self) -> Vec<u8> {
        let mut pattern = Vec::with_capacity(self.zone_count as usize);
        self.put_pattern(&mut pattern);
        pattern
    }

    pub(crate) fn put_pattern<B: BufMut>(&self, buf: &mut B) {
        for zone in 1..=self.zone_count {
            buf.put_u8(if self.contains(zone) { SELECTED } else { UNSELECTED });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_zone_pattern() {
        let selector = ZoneSelector::single(3, 8).unwrap();
        assert_eq!(selector.to_pattern(), vec![2, 2, 1, 2, 2, 2, 2, 2]);
        assert_eq!(selector.len(), 1);
    }

    #[test]
    fn all_zones_pattern() {
        let selector = ZoneSelector::all(8);
        assert_eq!(selector.to_pattern(), vec![1; 8]);
        assert_eq!(selector.zones(), (1..=8).collect());
    }

    #[test]
    fn every_subset_round_trips() {
        for bits in 1u16..(1 << 8) {
            let set: BTreeSet<ZoneId> = (1..=8).filter(|z| bits & (1 << (z - 1)) != 0).collect();
            let selector = ZoneSelector::for_zones(set.iter().copied(), 8).unwrap();
            assert_eq!(selector.zones(), set);
            assert_eq!(ZoneSelector::from_pattern(&selector.to_pattern()).zones(), set);
        }
    }

    #[test]
    fn empty_selection_is_an_error() {
        let err = ZoneSelector::for_zones([], 8).unwrap_err();
        assert!(matches!(err, MatrioError::EmptyZoneSelection));
    }

    #[test]
    fn out_of_range_zone_is_an_error() {
        assert!(matches!(
            ZoneSelector::for_zones([0], 8),
            Err(MatrioError::InvalidZone(0))
        ));
        assert!(matches!(
            ZoneSelector::for_zones([2, 9], 8),
            Err(MatrioError::InvalidZone(9))
        ));
    }

    #[test]
    fn unknown_pattern_bytes_are_unselected() {
        let selector = ZoneSelector::from_pattern(&[0x01, 0xff, 0x00, 0x01]);
        assert_eq!(selector.zones(), [1, 4].into_iter().collect());
    }

    #[test]
    fn duplicate_ids_collapse() {
        let selector = ZoneSelector::for_zones([2, 2, 2], 8).unwrap();
        assert_eq!(selector.len(), 1);
    }
}

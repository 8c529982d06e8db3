// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Address representations.
//!
//! An `AddressRep` maps transmission ids to address values and back. The
//! flow builds one canonical rep per domain (sequential ids), one per
//! split node (one-hot output masks) and one per user port (the user's
//! own address binning); address converters translate between them.

use std::collections::BTreeMap;

use crate::core::expr::clog2;

pub type AddressVal = u64;
pub type TransmissionId = u32;

/// "Any address": the transmission is not bound to a particular value.
pub const ADDR_ANY: AddressVal = AddressVal::MAX;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressRep {
    addr_to_xmis: BTreeMap<AddressVal, Vec<TransmissionId>>,
    xmis_to_addr: BTreeMap<TransmissionId, AddressVal>,
}

impl AddressRep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, xmis: TransmissionId, addr: AddressVal) {
        self.addr_to_xmis.entry(addr).or_default().push(xmis);
        self.xmis_to_addr.insert(xmis, addr);
    }

    pub fn xmis_for_addr(&self, addr: AddressVal) -> &[TransmissionId] {
        self.addr_to_xmis
            .get(&addr)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn addr_for_xmis(&self, xmis: TransmissionId) -> Option<AddressVal> {
        self.xmis_to_addr.get(&xmis).copied()
    }

    pub fn has_addr(&self, addr: AddressVal) -> bool {
        self.addr_to_xmis.contains_key(&addr)
    }

    /// Address bins in increasing address order.
    pub fn addr_bins(&self) -> impl Iterator<Item = (AddressVal, &[TransmissionId])> {
        self.addr_to_xmis.iter().map(|(a, x)| (*a, x.as_slice()))
    }

    pub fn n_addr_bins(&self) -> usize {
        self.addr_to_xmis.len()
    }

    /// Bits needed to represent the largest bound address. `ADDR_ANY`
    /// bins are ignored: they have no representation.
    pub fn size_in_bits(&self) -> u32 {
        self.addr_to_xmis
            .keys()
            .filter(|a| **a != ADDR_ANY)
            .map(|a| clog2(*a))
            .max()
            .unwrap_or(0)
    }

    /// True when every address bin holds a one-hot value, i.e. a split
    /// node using this rep never multicasts.
    pub fn is_pure_unicast(&self) -> bool {
        self.addr_to_xmis
            .keys()
            .all(|a| *a != ADDR_ANY && a.count_ones() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bidirectional_mapping() {
        let mut rep = AddressRep::new();
        rep.insert(0, 7);
        rep.insert(1, 12);
        rep.insert(2, 7);

        assert_eq!(rep.addr_for_xmis(0), Some(7));
        assert_eq!(rep.addr_for_xmis(1), Some(12));
        assert_eq!(rep.xmis_for_addr(7), &[0, 2]);
        assert_eq!(rep.n_addr_bins(), 2);
        assert!(rep.addr_for_xmis(9).is_none());
    }

    #[test]
    fn size_in_bits_covers_max_address() {
        let mut rep = AddressRep::new();
        rep.insert(0, 7);
        rep.insert(1, 12);
        // ceil(log2(13)) = 4
        assert_eq!(rep.size_in_bits(), 4);
    }

    #[test]
    fn any_address_ignored_for_sizing() {
        let mut rep = AddressRep::new();
        rep.insert(0, ADDR_ANY);
        assert_eq!(rep.size_in_bits(), 0);
        rep.insert(1, 1);
        assert_eq!(rep.size_in_bits(), 1);
    }

    #[test]
    fn unicast_detection() {
        let mut rep = AddressRep::new();
        rep.insert(0, 0b001);
        rep.insert(1, 0b100);
        assert!(rep.is_pure_unicast());
        rep.insert(2, 0b011);
        assert!(!rep.is_pure_unicast());
    }
}

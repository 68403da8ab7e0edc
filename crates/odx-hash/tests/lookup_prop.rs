//! Property-based tests for hex coding and sorted-table lookup.

use odx_hash::hex::{hex_to_bytes, hex_to_string};
use odx_hash::lookup::oid_table_lookup;
use odx_hash::{FanoutTable, HashAlgorithm, ObjectId};
use proptest::prelude::*;

proptest! {
    /// Hex encoding then decoding reproduces the input bytes.
    #[test]
    fn hex_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let hex = hex_to_string(&bytes);
        prop_assert_eq!(hex.len(), bytes.len() * 2);
        prop_assert_eq!(hex_to_bytes(&hex).unwrap(), bytes);
    }

    /// ObjectId ordering is exactly byte-slice ordering.
    #[test]
    fn oid_order_matches_bytes(a in proptest::array::uniform20(any::<u8>()),
                               b in proptest::array::uniform20(any::<u8>())) {
        let oa = ObjectId::from_bytes(&a, HashAlgorithm::Sha1).unwrap();
        let ob = ObjectId::from_bytes(&b, HashAlgorithm::Sha1).unwrap();
        prop_assert_eq!(oa.cmp(&ob), a.as_slice().cmp(b.as_slice()));
    }

    /// Every OID written into a sorted table is found at its own position,
    /// and absent OIDs report the right insertion point.
    #[test]
    fn table_lookup_roundtrip(mut raw in proptest::collection::vec(
        proptest::array::uniform20(any::<u8>()), 1..40
    )) {
        raw.sort();
        raw.dedup();
        let oids: Vec<ObjectId> = raw
            .iter()
            .map(|b| ObjectId::from_bytes(b, HashAlgorithm::Sha1).unwrap())
            .collect();

        let fanout = FanoutTable::build(&oids).to_bytes();
        let mut flat = Vec::new();
        for oid in &oids {
            flat.extend_from_slice(oid.as_bytes());
        }

        for (i, oid) in oids.iter().enumerate() {
            let r = oid_table_lookup(&fanout, &flat, 20, oid);
            prop_assert!(r.found);
            prop_assert_eq!(r.pos as usize, i);
        }

        // A probe absent from the table lands on its insertion point.
        let mut probe = *raw.first().unwrap();
        probe[19] = probe[19].wrapping_add(1);
        if !raw.contains(&probe) {
            let target = ObjectId::from_bytes(&probe, HashAlgorithm::Sha1).unwrap();
            let r = oid_table_lookup(&fanout, &flat, 20, &target);
            prop_assert!(!r.found);
            let expect = raw.iter().filter(|b| b.as_slice() < probe.as_slice()).count();
            prop_assert_eq!(r.pos as usize, expect);
        }
    }

    /// The fanout is monotone and totals the object count.
    #[test]
    fn fanout_monotone(mut raw in proptest::collection::vec(
        proptest::array::uniform20(any::<u8>()), 0..60
    )) {
        raw.sort();
        raw.dedup();
        let oids: Vec<ObjectId> = raw
            .iter()
            .map(|b| ObjectId::from_bytes(b, HashAlgorithm::Sha1).unwrap())
            .collect();
        let table = FanoutTable::build(&oids);
        let mut prev = 0;
        for byte in 0u16..=255 {
            let entry = table.range(byte as u8).end as u32;
            prop_assert!(entry >= prev);
            prev = entry;
        }
        prop_assert_eq!(table.total() as usize, oids.len());
    }
}

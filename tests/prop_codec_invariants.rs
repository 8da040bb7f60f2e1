// Copyright (c) 2026 Tox Secure Transport Contributors
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]

use proptest::prelude::*;

use tox_secure_transport::codec::extension;
use tox_secure_transport::codec::node_entry::{decode_extended, encode_extended, NodeEntry};
use tox_secure_transport::negotiation::commitment;
use tox_secure_transport::negotiation::{select_version, ProtocolCapabilities};
use tox_secure_transport::session::replay::ReplayWindow;

proptest! {
    #[test]
    fn extended_node_entry_round_trips_for_any_address_bytes(
        public_key in any::<[u8; 32]>(),
        address_type in any::<u8>(),
        address in proptest::collection::vec(any::<u8>(), 0..u8::MAX as usize),
        port in any::<u16>(),
    ) {
        let entry = NodeEntry { public_key, address_type, address, port };
        let wire = encode_extended(&entry).unwrap();
        let decoded = decode_extended(&wire).unwrap();
        prop_assert_eq!(decoded, entry);
    }

    #[test]
    fn replay_window_never_admits_the_same_counter_twice(
        counters in proptest::collection::vec(0u64..10_000, 1..200),
    ) {
        let mut window = ReplayWindow::new();
        let mut admitted = std::collections::HashSet::new();
        for n in counters {
            let first_admit = window.admit(n);
            if admitted.contains(&n) {
                prop_assert!(!first_admit, "counter {} admitted twice", n);
            } else if first_admit {
                admitted.insert(n);
            }
        }
    }

    #[test]
    fn version_selection_always_picks_the_numerically_highest_overlap(
        local_versions in proptest::collection::vec(1u8..20, 1..8),
        remote_versions in proptest::collection::vec(1u8..20, 0..8),
    ) {
        let caps = ProtocolCapabilities { supported_versions: local_versions.clone(), ..ProtocolCapabilities::default() };
        let selected = select_version(&caps, &remote_versions);
        let highest_overlap = local_versions
            .iter()
            .filter(|lv| remote_versions.contains(lv))
            .max()
            .copied();
        match selected {
            Some(v) => {
                prop_assert!(remote_versions.contains(&v));
                prop_assert_eq!(Some(v), highest_overlap);
            }
            None => {
                prop_assert!(local_versions.iter().all(|lv| !remote_versions.contains(lv)));
            }
        }
    }

    #[test]
    fn commitment_rejects_any_single_bit_flip(
        transcript_hash in any::<[u8; 32]>(),
        version in any::<u8>(),
        now in 0u64..4_000_000_000,
        flip_byte in 0usize..commitment::COMMITMENT_LEN,
        flip_bit in 0u8..8,
    ) {
        let mut bytes = commitment::build(&transcript_hash, version, now);
        bytes[flip_byte] ^= 1 << flip_bit;
        let verdict = commitment::verify(&transcript_hash, version, now, &bytes);
        prop_assert!(verdict.is_err());
    }

    #[test]
    fn extension_header_round_trips_for_any_payload(
        payload in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let framed = extension::with_header(&payload);
        let stripped = extension::validate_and_strip(&framed).unwrap();
        prop_assert_eq!(stripped, payload.as_slice());
    }
}

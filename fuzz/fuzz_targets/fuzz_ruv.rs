//! Fuzz target for RUV value parsing.
//!
//! This tests that parsing `nsds50ruv` values never panics
//! and that the divergence report stays consistent.

#![no_main]

use libfuzzer_sys::fuzz_target;
use replication_topology::ruv::ReplicaUpdateVector;

fuzz_target!(|data: (Vec<&str>, Vec<&str>)| {
    let (ours, theirs) = data;

    // Should never panic
    let a = ReplicaUpdateVector::parse(ours.iter().copied());
    let b = ReplicaUpdateVector::parse(theirs.iter().copied());

    // Never more elements than values
    assert!(a.len() <= ours.len());

    // A vector is never behind itself
    assert!(a.divergence(&a).is_empty());

    // Every reported lag names a replica we hold
    for lag in a.divergence(&b) {
        assert_eq!(a.max_csn_for(lag.replica_id), Some(lag.ours));
    }
});

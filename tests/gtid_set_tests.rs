//! Integration tests for GTID sets and their text format

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use roodb_gtid::gtid::{GtidError, GtidSet, SidMap, MAX_GNO};
use roodb_gtid::{GtidConfig, GtidState};

const UUID_A: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";
const UUID_B: &str = "8d9c5f0e-2b4a-4c1d-9e7f-0a1b2c3d4e5f";

fn random_set(rng: &mut StdRng, sidnos: u32) -> GtidSet {
    let mut set = GtidSet::new();
    for _ in 0..rng.gen_range(0..40) {
        let sidno = rng.gen_range(1..=sidnos);
        if rng.gen_bool(0.5) {
            set.add(sidno, rng.gen_range(1..200)).unwrap();
        } else {
            let start = rng.gen_range(1..200);
            let end = start + rng.gen_range(1..30);
            set.add_interval(sidno, start, end).unwrap();
        }
    }
    set
}

// ============ Idempotent Add ============

#[test]
fn test_add_twice_equals_add_once() {
    let mut rng = StdRng::seed_from_u64(0x5eed_0001);
    for _ in 0..200 {
        let base = random_set(&mut rng, 3);
        let sidno = rng.gen_range(1..=3);
        let gno = rng.gen_range(1..250);

        let mut once = base.clone();
        once.add(sidno, gno).unwrap();
        let mut twice = once.clone();
        twice.add(sidno, gno).unwrap();

        assert_eq!(once, twice);
        assert_eq!(once.intervals(sidno), twice.intervals(sidno));
    }
}

#[test]
fn test_add_interval_twice_equals_once() {
    let mut rng = StdRng::seed_from_u64(0x5eed_0002);
    for _ in 0..200 {
        let mut set = random_set(&mut rng, 2);
        let start = rng.gen_range(1..150);
        let end = start + rng.gen_range(1..50);
        set.add_interval(1, start, end).unwrap();
        let snapshot = set.clone();
        set.add_interval(1, start, end).unwrap();
        assert_eq!(set, snapshot);
    }
}

// ============ Text Round-Trip ============

#[test]
fn test_text_round_trip_randomized() {
    let mut rng = StdRng::seed_from_u64(0x5eed_0003);
    let mut map = SidMap::new();
    map.add(UUID_A.parse().unwrap()).unwrap();
    map.add(UUID_B.parse().unwrap()).unwrap();

    for _ in 0..300 {
        let original = random_set(&mut rng, 2);
        let text = original.to_text(&map);

        let mut parsed = GtidSet::new();
        parsed.add_from_text(&text, &mut map).unwrap();

        for sidno in 1..=2 {
            for gno in 1..260 {
                assert_eq!(
                    original.contains(sidno, gno),
                    parsed.contains(sidno, gno),
                    "sidno {} gno {} in '{}'",
                    sidno,
                    gno,
                    text
                );
            }
        }
        // Canonical text is a fixed point
        assert_eq!(parsed.to_text(&map), text);
    }
}

#[test]
fn test_round_trip_boundaries_two_sources() {
    let mut map = SidMap::new();
    let a = map.add(UUID_A.parse().unwrap()).unwrap();
    let b = map.add(UUID_B.parse().unwrap()).unwrap();

    let mut original = GtidSet::new();
    original.add_interval(a, 1, 10).unwrap();
    original.add_interval(a, 20, 30).unwrap();
    original.add_interval(b, 5, 8).unwrap();

    let text = original.to_text(&map);
    assert_eq!(text, format!("{}:1-10:20-30,{}:5-8", UUID_A, UUID_B));

    let mut fresh_map = SidMap::new();
    let parsed = GtidSet::from_text(&text, &mut fresh_map).unwrap();
    let pa = fresh_map.sid_to_sidno(&UUID_A.parse().unwrap()).unwrap();
    let pb = fresh_map.sid_to_sidno(&UUID_B.parse().unwrap()).unwrap();

    for (sidno, psidno) in [(a, pa), (b, pb)] {
        for iv in original.intervals(sidno) {
            for gno in [iv.start - 1, iv.start, iv.end - 1, iv.end] {
                assert_eq!(
                    original.contains(sidno, gno),
                    parsed.contains(psidno, gno),
                    "gno {}",
                    gno
                );
            }
        }
    }
}

#[test]
fn test_output_orders_sources_by_uuid() {
    let mut map = SidMap::new();
    // Registration order differs from UUID order
    let b = map.add(UUID_B.parse().unwrap()).unwrap();
    let a = map.add(UUID_A.parse().unwrap()).unwrap();

    let mut set = GtidSet::new();
    set.add(b, 3).unwrap();
    set.add(a, 7).unwrap();
    assert_eq!(set.to_text(&map), format!("{}:7,{}:3", UUID_A, UUID_B));
}

#[test]
fn test_malformed_text_is_atomic() {
    let mut map = SidMap::new();
    let mut set = GtidSet::from_text(&format!("{}:1-5", UUID_A), &mut map).unwrap();
    let before = set.clone();

    let err = set
        .add_from_text(&format!("{}:6-9,{}:7-3", UUID_A, UUID_B), &mut map)
        .unwrap_err();
    assert!(matches!(err, GtidError::Parse { .. }));
    assert_eq!(set, before);
}

// ============ Set Algebra ============

#[test]
fn test_union_and_difference_agree_with_membership() {
    let mut rng = StdRng::seed_from_u64(0x5eed_0004);
    for _ in 0..100 {
        let a = random_set(&mut rng, 2);
        let b = random_set(&mut rng, 2);

        let mut union = a.clone();
        union.add_gtid_set(&b).unwrap();
        let mut diff = a.clone();
        diff.remove_gtid_set(&b).unwrap();
        let inter = a.intersection(&b).unwrap();

        for sidno in 1..=2 {
            for gno in 1..240 {
                let in_a = a.contains(sidno, gno);
                let in_b = b.contains(sidno, gno);
                assert_eq!(union.contains(sidno, gno), in_a || in_b);
                assert_eq!(diff.contains(sidno, gno), in_a && !in_b);
                assert_eq!(inter.contains(sidno, gno), in_a && in_b);
            }
        }
        assert!(a.is_subset(&union));
        assert!(diff.is_subset(&a));
        assert_eq!(a.is_intersection_nonempty(&b), !inter.is_empty());
    }
}

// ============ Exhaustion ============

#[test]
fn test_automatic_allocation_exhausted() {
    let state = GtidState::new(
        &GtidConfig::new()
            .with_server_uuid(UUID_A.parse().unwrap())
            .with_gtid_executed(format!("{}:1-{}", UUID_A, MAX_GNO)),
    )
    .unwrap();

    let err = state.get_automatic_gno(1).unwrap_err();
    assert!(matches!(err, GtidError::GnoExhausted { sidno: 1 }));

    let mut ctx = roodb_gtid::gtid::SessionGtidContext::new(1);
    let err = state.acquire_automatic(&mut ctx).unwrap_err();
    assert!(matches!(err, GtidError::GnoExhausted { .. }));
    assert!(!ctx.owns_gtids());
}

#[test]
fn test_automatic_allocation_last_gno() {
    let state = GtidState::new(
        &GtidConfig::new()
            .with_server_uuid(UUID_A.parse().unwrap())
            .with_gtid_executed(format!("{}:1-{}", UUID_A, MAX_GNO - 1)),
    )
    .unwrap();
    assert_eq!(state.get_automatic_gno(1).unwrap(), MAX_GNO - 1);
}

//! Coordinate validation through the admission path: range checks plus the
//! (0,0) no-fix sentinel.

use meshnotes::gateway::commands::{
    validate_coordinates, Admission, RejectReason, Validator, ValidatorConfig,
};
use meshnotes::gateway::position_cache::PositionCache;
use meshnotes::storage::Store;

fn setup() -> (tempfile::TempDir, PositionCache, Validator) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let cache = PositionCache::new(store.clone());
    let validator = Validator::new(
        store,
        ValidatorConfig {
            max_note_bytes: 200,
            uptime_recent_secs: 300,
            gps_wait_secs: 120,
            duplicate_window_secs: 300,
        },
    );
    (dir, cache, validator)
}

#[test]
fn range_edges_are_valid_except_origin() {
    assert!(validate_coordinates(4.6097, -74.0817).is_ok());
    assert!(validate_coordinates(90.0, 180.0).is_ok());
    assert!(validate_coordinates(-90.0, -180.0).is_ok());
    assert_eq!(validate_coordinates(0.0, 0.0), Err(RejectReason::NoFix));
    assert_eq!(
        validate_coordinates(91.0, 0.0),
        Err(RejectReason::InvalidLatitude { value: 91.0 })
    );
    assert_eq!(
        validate_coordinates(-91.0, 0.0),
        Err(RejectReason::InvalidLatitude { value: -91.0 })
    );
    assert_eq!(
        validate_coordinates(0.0, 181.0),
        Err(RejectReason::InvalidLongitude { value: 181.0 })
    );
    assert_eq!(
        validate_coordinates(0.0, -181.0),
        Err(RejectReason::InvalidLongitude { value: -181.0 })
    );
}

#[test]
fn origin_position_is_rejected() {
    let (_dir, mut cache, validator) = setup();
    cache.update("node1", 0.0, 0.0);
    let admission = validator.admit(&mut cache, "node1", "test", None).unwrap();
    assert_eq!(admission, Admission::Rejected(RejectReason::NoFix));
}

#[test]
fn out_of_range_positions_are_rejected() {
    let (_dir, mut cache, validator) = setup();

    cache.update("node1", 91.0, 0.0);
    assert!(matches!(
        validator.admit(&mut cache, "node1", "test", None).unwrap(),
        Admission::Rejected(RejectReason::InvalidLatitude { .. })
    ));

    cache.update("node1", 0.0, 181.0);
    assert!(matches!(
        validator.admit(&mut cache, "node1", "test", None).unwrap(),
        Admission::Rejected(RejectReason::InvalidLongitude { .. })
    ));
}

#[test]
fn valid_position_is_queued_with_queue_id() {
    let (_dir, mut cache, validator) = setup();
    cache.update("node1", 4.6097, -74.0817);
    match validator
        .admit(&mut cache, "node1", "broken bench", None)
        .unwrap()
    {
        Admission::Queued { queue_id } => assert!(queue_id.starts_with("Q-")),
        other => panic!("expected queued, got {:?}", other),
    }
}

#[test]
fn absent_position_is_distinct_from_invalid() {
    let (_dir, mut cache, validator) = setup();
    let admission = validator.admit(&mut cache, "ghost", "test", None).unwrap();
    assert_eq!(admission, Admission::Rejected(RejectReason::NoPosition));
}

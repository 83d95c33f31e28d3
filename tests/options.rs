//! Option validation happens before the checkpoint is touched.

use ironstate::checkpoint::CheckpointResolver;
use ironstate::{JoinSide, StateError, StateReadOptions, StoreSelector};

const MISSING: &str = "/definitely/not/a/checkpoint";

#[test]
fn test_both_store_and_side_conflict_for_every_combination() {
    let stores = ["default", "left-keyToNumValues", "", "anything"];
    let sides = ["left", "right", "", "middle"];
    for store in stores {
        for side in sides {
            let options = StateReadOptions::new(MISSING)
                .store_name(store)
                .join_side(side);
            let err = CheckpointResolver::validate(&options).unwrap_err();
            assert!(
                matches!(err, StateError::ConflictingOption { .. }),
                "store {store:?} side {side:?} gave {err}"
            );
        }
    }
}

#[test]
fn test_negative_ids_are_invalid_options() {
    for options in [
        StateReadOptions::new(MISSING).batch_id(-1),
        StateReadOptions::new(MISSING).operator_id(-3),
    ] {
        let err = CheckpointResolver::resolve(&options).unwrap_err();
        assert_eq!(err.kind(), "InvalidOption", "{err}");
    }
}

#[test]
fn test_empty_store_name_and_unknown_side_are_invalid_options() {
    let err = CheckpointResolver::resolve(&StateReadOptions::new(MISSING).store_name(" "))
        .unwrap_err();
    assert!(matches!(err, StateError::InvalidOption { option: "store_name", .. }));

    let err = CheckpointResolver::resolve(&StateReadOptions::new(MISSING).join_side("LEFT"))
        .unwrap_err();
    assert!(matches!(err, StateError::InvalidOption { option: "join_side", .. }));
}

#[test]
fn test_empty_path_is_invalid_option() {
    let err = CheckpointResolver::validate(&StateReadOptions::default()).unwrap_err();
    assert!(matches!(err, StateError::InvalidOption { option: "path", .. }));
}

#[test]
fn test_store_selector_resolution() {
    let validated = CheckpointResolver::validate(&StateReadOptions::new(MISSING)).unwrap();
    assert_eq!(validated.store_selector, StoreSelector::Default);
    assert_eq!(validated.operator_id, 0);
    assert_eq!(validated.batch_id, None);

    let validated =
        CheckpointResolver::validate(&StateReadOptions::new(MISSING).store_name("default"))
            .unwrap();
    assert_eq!(validated.store_selector, StoreSelector::Default);

    let validated = CheckpointResolver::validate(
        &StateReadOptions::new(MISSING).store_name("right-keyWithIndexToValue"),
    )
    .unwrap();
    assert_eq!(
        validated.store_selector,
        StoreSelector::Store("right-keyWithIndexToValue".into())
    );

    let validated = CheckpointResolver::validate(
        &StateReadOptions::new(MISSING)
            .join_side("right")
            .operator_id(2)
            .batch_id(7),
    )
    .unwrap();
    assert_eq!(validated.store_selector, StoreSelector::JoinSide(JoinSide::Right));
    assert_eq!(validated.operator_id, 2);
    assert_eq!(validated.batch_id, Some(7));
}

#[test]
fn test_valid_options_still_need_a_checkpoint() {
    let err = CheckpointResolver::resolve(&StateReadOptions::new(MISSING)).unwrap_err();
    assert_eq!(err.kind(), "InvalidCheckpoint");
}

//! Property tests for `TimepointStateMachine`: arbitrary sequences of
//! pause/resume/retake/abort calls must never violate its invariants,
//! regardless of which calls are illegal in the current state.

use acquisition_control_core::{FovId, TimepointState, TimepointStateMachine};
use proptest::prelude::*;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Op {
    RequestPause,
    CompletePause,
    Resume,
    Retake(Vec<u32>),
    CompleteRetakes,
    MarkFovCaptured,
    MarkAllCaptured,
    Abort,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::RequestPause),
        Just(Op::CompletePause),
        Just(Op::Resume),
        prop::collection::vec(0u32..6, 0..4).prop_map(Op::Retake),
        Just(Op::CompleteRetakes),
        Just(Op::MarkFovCaptured),
        Just(Op::MarkAllCaptured),
        Just(Op::Abort),
    ]
}

/// Every invariant a reachable state must satisfy, independent of how it
/// was reached.
fn assert_invariants(sm: &TimepointStateMachine) {
    let retake_list = sm.get_retake_list();
    match sm.state() {
        // A non-empty retake list only ever exists while Retaking; it is
        // cleared on both normal completion and abort-from-retaking.
        TimepointState::Retaking => {}
        _ => assert!(
            retake_list.is_empty(),
            "retake list must be empty outside Retaking, found {retake_list:?}"
        ),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn arbitrary_op_sequences_never_violate_invariants(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let sm = TimepointStateMachine::new(6);
        for op in ops {
            match op {
                Op::RequestPause => { sm.request_pause(); }
                Op::CompletePause => { sm.complete_pause(); }
                Op::Resume => { let _ = sm.resume(); }
                Op::Retake(fovs) => {
                    let ids: Vec<FovId> = fovs.into_iter().map(|i| FovId::new("A", i)).collect();
                    let _ = sm.retake(ids);
                }
                Op::CompleteRetakes => { let _ = sm.complete_retakes(); }
                Op::MarkFovCaptured => { sm.mark_fov_captured(); }
                Op::MarkAllCaptured => { let _ = sm.mark_all_captured(); }
                Op::Abort => { sm.abort(); }
            }
            assert_invariants(&sm);
        }
    }

    /// Abort from `Retaking` must always return the run to `Paused` and
    /// never propagate a whole-run abort; abort from anything else always
    /// does propagate.
    #[test]
    fn abort_whole_run_flag_matches_pre_abort_state(retake_fov in 0u32..4) {
        let sm = TimepointStateMachine::new(4);
        sm.request_pause();
        sm.complete_pause();
        sm.retake(vec![FovId::new("A", retake_fov)]).unwrap();
        let (accepted, abort_whole_run) = sm.abort();
        prop_assert!(accepted);
        prop_assert!(!abort_whole_run);
        prop_assert_eq!(sm.state(), TimepointState::Paused);

        let sm2 = TimepointStateMachine::new(4);
        let (accepted2, abort_whole_run2) = sm2.abort();
        prop_assert!(accepted2);
        prop_assert!(abort_whole_run2);
    }

    /// `wait_for_pause` with a zero timeout never blocks and always
    /// reflects exactly whether a pause is currently pending.
    #[test]
    fn wait_for_pause_zero_timeout_is_non_blocking(request in any::<bool>()) {
        let sm = TimepointStateMachine::new(2);
        if request {
            sm.request_pause();
        }
        let pending = sm.wait_for_pause(Some(Duration::from_millis(0)));
        prop_assert_eq!(pending, request);
    }
}

//! Property-based tests for the flat solver layout.
//!
//! Every record must survive a flat round trip bit for bit, whatever the
//! doubles hold: NaN payloads, infinities, signed zeros and subnormals
//! included.
//!
//! Run with: cargo test -p drivempc-core --test layout_properties

use drivempc_core::layout::{
    PARAMETER_SET_OFFSET, SOLVER_INPUT_LEN, STAGE_PARAMETERS_LEN, STAGE_STATE_LEN,
    WEIGHTS_OFFSET,
};
use drivempc_core::{FlatLayout, SolverInput, StageParameters, StageState, TERMINAL_STAGE};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn arb_value() -> impl Strategy<Value = f64> {
    prop_oneof![
        6 => any::<u64>().prop_map(f64::from_bits),
        1 => Just(f64::NAN),
        1 => Just(f64::INFINITY),
        1 => Just(f64::NEG_INFINITY),
        1 => Just(-0.0),
        1 => Just(f64::MIN_POSITIVE / 4.0),
    ]
}

fn arb_flat(len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(arb_value(), len)
}

fn bits(values: &[f64]) -> Vec<u64> {
    values.iter().map(|v| v.to_bits()).collect()
}

/// Slots holding the terminal stage's motor weights in a solver input.
fn terminal_motor_weights() -> std::ops::Range<usize> {
    let start = PARAMETER_SET_OFFSET + TERMINAL_STAGE * STAGE_PARAMETERS_LEN + WEIGHTS_OFFSET;
    start..start + 4
}

// =============================================================================
// Property Tests: Records
// =============================================================================

proptest! {
    #[test]
    fn stage_parameters_roundtrip_bit_exact(flat in arb_flat(STAGE_PARAMETERS_LEN)) {
        let params = StageParameters::read_flat(&flat).unwrap();
        prop_assert_eq!(bits(&params.to_flat()), bits(&flat));
    }

    #[test]
    fn stage_state_roundtrip_bit_exact(flat in arb_flat(STAGE_STATE_LEN)) {
        let state = StageState::read_flat(&flat).unwrap();
        prop_assert_eq!(bits(&state.to_flat()), bits(&flat));
    }

    #[test]
    fn wrong_length_is_rejected(len in 0usize..64) {
        prop_assume!(len != STAGE_PARAMETERS_LEN);
        let flat = vec![0.0; len];
        prop_assert!(StageParameters::read_flat(&flat).is_err());
        let mut out = vec![1.0; len];
        prop_assert!(StageParameters::default().write_flat(&mut out).is_err());
        prop_assert!(out.iter().all(|&v| v == 1.0));
    }
}

// =============================================================================
// Property Tests: Solver Input
// =============================================================================

proptest! {
    /// Full input round trip. The terminal stage never carries motor weights,
    /// so those slots are zero on the way in.
    #[test]
    fn solver_input_roundtrip_bit_exact(mut flat in arb_flat(SOLVER_INPUT_LEN)) {
        flat[terminal_motor_weights()].fill(0.0);
        let input = SolverInput::read_flat(&flat).unwrap();

        let mut out = vec![0.0; SOLVER_INPUT_LEN];
        input.write_flat(&mut out).unwrap();
        prop_assert_eq!(bits(&out), bits(&flat));
    }

    /// Any terminal motor weight reads back as zero; every other slot is
    /// untouched.
    #[test]
    fn terminal_motor_weights_read_back_zero(flat in arb_flat(SOLVER_INPUT_LEN)) {
        let out = SolverInput::read_flat(&flat).unwrap().to_flat();
        let terminal = terminal_motor_weights();
        for (i, (a, b)) in flat.iter().zip(&out).enumerate() {
            if terminal.contains(&i) {
                prop_assert_eq!(b.to_bits(), 0.0f64.to_bits());
            } else {
                prop_assert_eq!(a.to_bits(), b.to_bits());
            }
        }
    }
}

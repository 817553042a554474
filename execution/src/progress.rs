use tapgame_types::{player::ENERGY_REGEN_PER_SECOND, PlayerState};

/// Applies passive progress (energy regeneration) up to `now_ms`.
///
/// A snapshot that was never initialized only records `now_ms`. Otherwise energy
/// regenerates for the elapsed time, clamped at capacity, and `last_update` is moved
/// to `now_ms` even when the clock went backwards. Energy never regresses.
pub fn simulate(state: &mut PlayerState, now_ms: u64) {
    if state.last_update == 0 {
        state.last_update = now_ms;
        return;
    }

    let elapsed_secs = now_ms.saturating_sub(state.last_update) as f64 / 1_000.0;
    if elapsed_secs > 0.0 {
        let capacity = state.max_energy as f64;
        state.energy = (state.energy + elapsed_secs * ENERGY_REGEN_PER_SECOND).min(capacity);
    }
    state.last_update = now_ms;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drained(energy: f64, last_update: u64) -> PlayerState {
        PlayerState {
            energy,
            last_update,
            ..PlayerState::default()
        }
    }

    #[test]
    fn uninitialized_snapshot_only_records_time() {
        let mut state = drained(10.0, 0);
        simulate(&mut state, 5_000);
        assert_eq!(state.energy, 10.0);
        assert_eq!(state.last_update, 5_000);
    }

    #[test]
    fn regenerates_one_unit_per_second() {
        let mut state = drained(10.0, 1_000);
        simulate(&mut state, 3_500);
        assert_eq!(state.energy, 12.5);
        assert_eq!(state.last_update, 3_500);
    }

    #[test]
    fn clamps_at_capacity() {
        let mut state = drained(990.0, 1_000);
        simulate(&mut state, 1_000_000);
        assert_eq!(state.energy, 1_000.0);
    }

    #[test]
    fn clock_skew_never_regresses_energy() {
        let mut state = drained(50.0, 10_000);
        simulate(&mut state, 4_000);
        assert_eq!(state.energy, 50.0);
        assert_eq!(state.last_update, 4_000);
    }

    #[test]
    fn second_call_at_same_instant_is_noop() {
        let mut state = drained(100.0, 1_000);
        simulate(&mut state, 61_000);
        let once = state.clone();
        simulate(&mut state, 61_000);
        assert_eq!(state, once);
    }

    proptest! {
        #[test]
        fn energy_stays_in_bounds(
            energy_frac in 0.0f64..=1.0,
            max_energy in 1u32..10_000,
            last_update in 0u64..10_000_000,
            now_ms in 0u64..10_000_000,
        ) {
            let mut state = PlayerState {
                energy: energy_frac * max_energy as f64,
                max_energy,
                last_update,
                ..PlayerState::default()
            };
            let before = state.energy;
            simulate(&mut state, now_ms);
            prop_assert!(state.energy >= 0.0);
            prop_assert!(state.energy <= max_energy as f64);
            prop_assert!(state.energy >= before);
            prop_assert_eq!(state.last_update, now_ms);
        }
    }
}

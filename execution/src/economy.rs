//! Pricing curves and per-action state transitions.

use rand::Rng;
use tapgame_types::{player::ENERGY_UPGRADE_STEP, Action, Event, PlayerState};

use crate::gate::TapDecision;

pub const MULTITAP_BASE_PRICE: f64 = 100.0;
pub const ENERGY_BASE_PRICE: f64 = 200.0;
pub const PRICE_GROWTH: f64 = 1.2;
pub const SKIN_PRICE: u64 = 1_000;
pub const COMBO_PROBABILITY: f64 = 0.05;
pub const COMBO_MULTIPLIER: u64 = 4;

/// `floor(base * 1.2^(level - 1))`.
pub fn upgrade_price(base: f64, level: u32) -> u64 {
    let exponent = level.saturating_sub(1) as f64;
    (base * PRICE_GROWTH.powf(exponent)).floor() as u64
}

pub fn multitap_price(level: u32) -> u64 {
    upgrade_price(MULTITAP_BASE_PRICE, level)
}

pub fn energy_price(level: u32) -> u64 {
    upgrade_price(ENERGY_BASE_PRICE, level)
}

/// Deducts `price` when affordable.
fn charge(state: &mut PlayerState, price: u64) -> Result<(), Event> {
    if state.coins < price as f64 {
        return Err(Event::NotEnoughCoins { required: price });
    }
    state.coins = (state.coins - price as f64).max(0.0);
    Ok(())
}

fn tap(state: &mut PlayerState, decision: TapDecision, rng: &mut impl Rng) -> Event {
    if let Some(ban_end_time) = decision.ban_end_time() {
        return Event::Banned { ban_end_time };
    }
    if state.energy < 1.0 {
        return Event::NoEnergy;
    }

    state.energy -= 1.0;
    let is_combo = rng.gen_bool(COMBO_PROBABILITY);
    let multiplier = if is_combo { COMBO_MULTIPLIER } else { 1 };
    let coins_earned = state.multi_tap_level as u64 * multiplier;
    state.coins += coins_earned as f64;
    Event::tapped(coins_earned, is_combo)
}

fn buy_multitap(state: &mut PlayerState) -> Event {
    if let Err(event) = charge(state, multitap_price(state.multi_tap_level)) {
        return event;
    }
    state.multi_tap_level += 1;
    Event::ok()
}

fn buy_energy(state: &mut PlayerState) -> Event {
    if let Err(event) = charge(state, energy_price(state.energy_level)) {
        return event;
    }
    state.energy_level += 1;
    state.max_energy += ENERGY_UPGRADE_STEP;
    state.energy = state.max_energy as f64;
    Event::ok()
}

fn buy_skin(state: &mut PlayerState) -> Event {
    if state.skin_bought {
        return Event::AlreadyOwned;
    }
    if let Err(event) = charge(state, SKIN_PRICE) {
        return event;
    }
    state.skin_bought = true;
    Event::ok()
}

/// Applies one resolved action. `decision` is only consulted for gated actions.
pub fn apply_action(
    state: &mut PlayerState,
    action: Action,
    decision: TapDecision,
    rng: &mut impl Rng,
) -> Event {
    match action {
        Action::Tap => tap(state, decision, rng),
        Action::BuyMultitap => buy_multitap(state),
        Action::BuyEnergy => buy_energy(state),
        Action::BuyAutotap => Event::FeatureDisabled,
        Action::BuySkin => buy_skin(state),
    }
}

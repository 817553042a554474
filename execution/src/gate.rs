use tapgame_types::PlayerState;

/// Taps tolerated inside one counting window.
pub const MAX_TAPS_PER_WINDOW: u32 = 20;
/// Length of the tap counting window.
pub const TAP_WINDOW_MS: u64 = 1_000;
/// Penalty applied when the limit is exceeded.
pub const AUTOCLICK_BAN_MS: u64 = 2 * 60 * 1_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TapDecision {
    Allowed,
    AlreadyBanned { until: u64 },
    NewlyBanned { until: u64 },
}

impl TapDecision {
    pub fn ban_end_time(&self) -> Option<u64> {
        match self {
            TapDecision::Allowed => None,
            TapDecision::AlreadyBanned { until } | TapDecision::NewlyBanned { until } => {
                Some(*until)
            }
        }
    }
}

/// Counts a tap against a fixed one-second window and bans on overflow.
///
/// Counters reset only when a new window starts, so a burst straddling a window
/// edge can reach twice the nominal rate before tripping the ban.
pub fn check_tap(state: &mut PlayerState, now_ms: u64) -> TapDecision {
    if state.ban_end_time > now_ms {
        return TapDecision::AlreadyBanned {
            until: state.ban_end_time,
        };
    }

    if now_ms.saturating_sub(state.tap_window_start) >= TAP_WINDOW_MS {
        state.tap_window_start = now_ms;
        state.tap_count = 1;
    } else {
        state.tap_count = state.tap_count.saturating_add(1);
    }

    if state.tap_count > MAX_TAPS_PER_WINDOW {
        state.ban_end_time = now_ms + AUTOCLICK_BAN_MS;
        state.tap_count = 0;
        return TapDecision::NewlyBanned {
            until: state.ban_end_time,
        };
    }

    TapDecision::Allowed
}

//! Expression & tremulant modulation
//!
//! Swell-box expression messages are emitted by the engine actor on position
//! changes (it needs a consistent view of which enclosed ranks are
//! sounding). This module owns the other half: the tremulant oscillator
//! math and the clock task that drives it while the process runs.

use crate::config::ModulationConfig;
use crate::engine::EngineHandle;
use crate::midi::PITCH_BEND_CENTER;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Advance an oscillator phase by one tick, wrapped to one period
pub fn advance_phase(phase: f32, rate_hz: f32, dt: f32) -> f32 {
    (phase + std::f32::consts::TAU * rate_hz * dt) % std::f32::consts::TAU
}

/// Pitch-bend value for an oscillator phase at the given depth
pub fn tremulant_bend(phase: f32, depth: u16) -> u16 {
    let offset = (phase.sin() * depth as f32) as i32;
    (PITCH_BEND_CENTER as i32 + offset).clamp(0, 0x3FFF) as u16
}

/// Drive the engine's tremulant oscillators at the configured tick rate.
///
/// The clock runs for the process lifetime; the engine skips groups that
/// are not engaged, so an idle tick costs one channel send.
pub fn spawn_tremulant_clock(
    engine: EngineHandle,
    modulation: &ModulationConfig,
) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_millis(modulation.tremulant_tick_ms.max(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if !engine.is_alive() {
                break;
            }
            engine.tremulant_tick();
        }

        debug!("Tremulant clock stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_wraps_at_tau() {
        let mut phase = 0.0;
        for _ in 0..1000 {
            phase = advance_phase(phase, 5.0, 0.025);
            assert!((0.0..std::f32::consts::TAU).contains(&phase));
        }
    }

    #[test]
    fn test_bend_centered_at_zero_phase() {
        assert_eq!(tremulant_bend(0.0, 400), PITCH_BEND_CENTER);
    }

    #[test]
    fn test_bend_swings_both_ways_within_range() {
        let up = tremulant_bend(std::f32::consts::FRAC_PI_2, 400);
        let down = tremulant_bend(3.0 * std::f32::consts::FRAC_PI_2, 400);
        assert_eq!(up, PITCH_BEND_CENTER + 400);
        assert_eq!(down, PITCH_BEND_CENTER - 400);
    }

    #[test]
    fn test_bend_clamped_at_extremes() {
        // A depth larger than the bend range must not wrap
        let bend = tremulant_bend(std::f32::consts::FRAC_PI_2, 0x3FFF);
        assert_eq!(bend, 0x3FFF);
    }
}

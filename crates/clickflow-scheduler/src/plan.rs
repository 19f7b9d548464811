//! Daily Plan Generator — distributes a daily click target across the
//! active hours so the hourly counts look like human traffic.
//!
//! Pipeline: peak/off-peak weighting → exact normalization → bounded
//! jitter → repair pass. The repair pass restores the exact sum the
//! jitter broke, so `Σ hourly == daily_click_target` always holds on the
//! stored plan.

use clickflow_core::types::ActiveWindow;
use rand::seq::SliceRandom;
use rand::Rng;

/// Static traffic-shape weight for one hour of the day.
/// Peak blocks get ×1.2, the small hours ×0.8, everything else ×1.0.
pub fn hour_weight(hour: u8) -> f64 {
    match hour {
        9..=11 | 14..=16 | 19..=21 => 1.2,
        0..=5 => 0.8,
        _ => 1.0,
    }
}

/// Build the 24-slot hourly target array for one day.
///
/// `variance` is the jitter fraction (0.0 disables jitter entirely).
/// Slots outside the window are zero; the sum over the window equals
/// `daily_target` exactly.
pub fn build_hourly_targets(
    daily_target: u32,
    window: &ActiveWindow,
    variance: f64,
    rng: &mut impl Rng,
) -> [u32; 24] {
    let hours = window.hours();
    let daily_target = daily_target.max(1);
    let mut targets = [0u32; 24];

    // Weighted share per eligible hour, normalized to the exact target
    let base_avg = daily_target as f64 / hours.len() as f64;
    let weighted: Vec<f64> = hours.iter().map(|&h| base_avg * hour_weight(h)).collect();
    let weighted_sum: f64 = weighted.iter().sum();
    let scale = daily_target as f64 / weighted_sum;

    let variance = variance.clamp(0.0, 0.9);
    for (&h, &w) in hours.iter().zip(weighted.iter()) {
        let ideal = w * scale;
        let jittered = if variance > 0.0 {
            let lo = ideal * (1.0 - variance);
            let hi = ideal * (1.0 + variance);
            rng.gen_range(lo..=hi)
        } else {
            ideal
        };
        targets[h as usize] = jittered.round().max(0.0) as u32;
    }

    repair(&mut targets, daily_target, &hours, rng);
    targets
}

/// Nudge random in-window slots by ±1 until the sum is exact.
/// Decrementing below 1 is avoided while any slot above 1 remains;
/// slots never go below 0. Each pass moves the sum one step closer, so
/// the loop always converges.
fn repair(targets: &mut [u32; 24], daily_target: u32, hours: &[u8], rng: &mut impl Rng) {
    loop {
        let sum: u32 = hours.iter().map(|&h| targets[h as usize]).sum();
        if sum == daily_target {
            break;
        }
        if sum < daily_target {
            if let Some(&h) = hours.choose(rng) {
                targets[h as usize] += 1;
            }
        } else {
            let above_one: Vec<u8> = hours
                .iter()
                .copied()
                .filter(|&h| targets[h as usize] > 1)
                .collect();
            let candidates = if above_one.is_empty() {
                hours
                    .iter()
                    .copied()
                    .filter(|&h| targets[h as usize] > 0)
                    .collect()
            } else {
                above_one
            };
            if let Some(&h) = candidates.choose(rng) {
                targets[h as usize] -= 1;
            }
        }
    }
    debug_assert_eq!(
        hours.iter().map(|&h| targets[h as usize]).sum::<u32>(),
        daily_target
    );
}

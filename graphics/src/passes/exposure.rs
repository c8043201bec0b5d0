//! CPU reference of the auto-exposure shaders.
//!
//! The histogram stage bins log2 luminance between
//! `min_log_luminance` and `max_log_luminance`. Bin 0 collects pixels
//! darker than the range and is ignored by the average:
//!
//! ```text
//! t   = (log2(L) - min) / (max - min)        clamped to [0, 1]
//! bin = 1 + min(floor(t * (bins - 1)), bins - 2)
//! ```
//!
//! The adaptation stage averages the bins inside the percentile window,
//! then moves the stored luminance toward it in log space.

use bytemuck::{Pod, Zeroable};
use oxygen_scene::PostProcessVolume;
use oxygen_scene::environment::AutoExposureSettings;

/// Rec. 709 relative luminance.
pub fn luminance(rgb: [f32; 3]) -> f32 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}

fn log_range(settings: &AutoExposureSettings) -> f32 {
    (settings.max_log_luminance - settings.min_log_luminance).max(f32::EPSILON)
}

/// Bin of one luminance value in a histogram of `bins` bins.
pub fn histogram_bin(lum: f32, settings: &AutoExposureSettings, bins: usize) -> usize {
    if bins < 2 || !(lum > 0.0) || lum.log2() < settings.min_log_luminance {
        return 0;
    }
    let ranged = bins - 1;
    let t = ((lum.log2() - settings.min_log_luminance) / log_range(settings)).clamp(0.0, 1.0);
    1 + ((t * ranged as f32).floor() as usize).min(ranged - 1)
}

pub fn build_luminance_histogram(lums: &[f32], settings: &AutoExposureSettings, bins: usize) -> Vec<u32> {
    let mut histogram = vec![0u32; bins];
    if bins == 0 {
        return histogram;
    }
    for &lum in lums {
        histogram[histogram_bin(lum, settings, bins)] += 1;
    }
    histogram
}

/// Luminance at the center of `bin` (`bin >= 1`).
fn bin_center_log(bin: usize, settings: &AutoExposureSettings, bins: usize) -> f32 {
    let ranged = (bins - 1) as f32;
    settings.min_log_luminance + (bin as f32 - 0.5) / ranged * log_range(settings)
}

/// Geometric mean luminance of the samples inside the percentile window.
///
/// An empty histogram yields the bottom of the range. When the window
/// collapses to a point, the luminance of the bin holding it is returned.
pub fn histogram_average_luminance(histogram: &[u32], settings: &AutoExposureSettings) -> f32 {
    let bins = histogram.len();
    if bins < 2 {
        return settings.min_log_luminance.exp2();
    }
    let total: u64 = histogram[1..].iter().map(|&c| u64::from(c)).sum();
    if total == 0 {
        return settings.min_log_luminance.exp2();
    }
    let low_pct = settings.low_percentile.clamp(0.0, 1.0);
    let high_pct = settings.high_percentile.clamp(low_pct, 1.0);
    let low = total as f64 * f64::from(low_pct);
    let high = total as f64 * f64::from(high_pct);

    let mut accumulated = 0.0f64;
    let mut weighted = 0.0f64;
    let mut weight = 0.0f64;
    let mut point_bin = None;
    for (bin, &count) in histogram.iter().enumerate().skip(1) {
        if count == 0 {
            continue;
        }
        let start = accumulated;
        let end = accumulated + f64::from(count);
        accumulated = end;
        if point_bin.is_none() && end > low {
            point_bin = Some(bin);
        }
        let overlap = end.min(high) - start.max(low);
        if overlap > 0.0 {
            weighted += overlap * f64::from(bin_center_log(bin, settings, bins));
            weight += overlap;
        }
    }

    if weight > 0.0 {
        return ((weighted / weight) as f32).exp2();
    }
    // Collapsed window; a window at the very top lands in the last bin.
    let bin = point_bin.unwrap_or_else(|| {
        histogram
            .iter()
            .rposition(|&c| c > 0)
            .unwrap_or(bins - 1)
            .max(1)
    });
    bin_center_log(bin, settings, bins).exp2()
}

/// Moves `current` toward `target` in log2 space over `dt` seconds.
pub fn adapt_luminance(current: f32, target: f32, dt: f32, settings: &AutoExposureSettings) -> f32 {
    let floor = settings.min_log_luminance.exp2();
    let current_log = current.max(floor).log2();
    let target_log = target.max(floor).log2();
    let speed = if target_log > current_log {
        settings.speed_up
    } else {
        settings.speed_down
    };
    let factor = 1.0 - (-dt.max(0.0) * speed.max(0.0)).exp();
    (current_log + (target_log - current_log) * factor).exp2()
}

/// EV100 whose metered exposure matches `luminance` (K = 12.5).
pub fn ev100_from_luminance(luminance: f32) -> f32 {
    (luminance.max(f32::MIN_POSITIVE) * 100.0 / 12.5).log2()
}

/// Exposure multiplier of a camera at `ev100` (saturation-based, S = 100).
pub fn exposure_from_ev100(ev100: f32) -> f32 {
    1.0 / (1.2 * ev100.exp2())
}

/// Per-view exposure state kept on the GPU between frames.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ExposureState {
    pub avg_luminance: f32,
    pub exposure: f32,
    pub ev100: f32,
    pub _pad: f32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<ExposureState>(), 16);

impl ExposureState {
    /// State before the first adaptation: middle gray, unit exposure.
    pub fn initial(settings: &AutoExposureSettings) -> Self {
        let avg = settings.target_luminance.max(f32::MIN_POSITIVE);
        Self {
            avg_luminance: avg,
            exposure: 1.0,
            ev100: ev100_from_luminance(avg),
            _pad: 0.0,
        }
    }

    /// Manual exposure of `volume`, compensation included.
    pub fn manual(volume: &PostProcessVolume) -> Self {
        Self {
            avg_luminance: 0.0,
            exposure: exposure_from_ev100(volume.manual_ev100) * volume.exposure_compensation_ev.exp2(),
            ev100: volume.manual_ev100,
            _pad: 0.0,
        }
    }
}

/// One adaptation step from `previous` given this frame's histogram.
pub fn step_exposure(previous: &ExposureState, histogram: &[u32], volume: &PostProcessVolume, dt: f32) -> ExposureState {
    let settings = &volume.auto_exposure;
    let measured = histogram_average_luminance(histogram, settings);
    let avg = if previous.avg_luminance > 0.0 {
        adapt_luminance(previous.avg_luminance, measured, dt, settings)
    } else {
        measured
    };
    ExposureState {
        avg_luminance: avg,
        exposure: settings.target_luminance / avg * volume.exposure_compensation_ev.exp2(),
        ev100: ev100_from_luminance(avg),
        _pad: 0.0,
    }
}

use crate::bouts::Bout;
use crate::config::KinematicsConfig;
use crate::types::{angle_diff, Point, WellTrackingData};
use serde::{Deserialize, Serialize};

pub const RAD_TO_DEG: f64 = 180.0 / std::f64::consts::PI;

/// Per-bout summary statistics. Angles are stored in degrees, distances
/// in physical units, speeds in units per second.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KinematicParameters {
    /// Bout length in seconds.
    pub bout_duration: f64,
    pub total_distance: f64,
    pub mean_speed: f64,
    pub max_speed: f64,
    pub median_speed: f64,
    pub number_of_bends: usize,
    /// Oscillations per second, one oscillation being two bends.
    pub tail_beat_frequency: f64,
    pub max_bend_amplitude: f64,
    pub mean_bend_amplitude: f64,
    pub median_bend_amplitude: f64,
    pub max_tail_angle: f64,
    /// Absolute heading change over the bout, wrapped to [0, 180].
    pub absolute_yaw: f64,
    pub max_abs_curvature: f64,
    pub mean_abs_curvature: f64,
}

/// Angle of tail point k relative to the body axis (the first chain
/// segment), radians, signed.
pub fn tail_point_angle(chain: &[Point], k: usize) -> f64 {
    let body = (chain[1].y - chain[0].y).atan2(chain[1].x - chain[0].x);
    let direction = (chain[k].y - chain[0].y).atan2(chain[k].x - chain[0].x);
    angle_diff(direction, body)
}

/// Angle trace of tail point k over an inclusive frame interval.
pub fn tail_angle_series(
    data: &WellTrackingData,
    animal: usize,
    k: usize,
    start: u32,
    end: u32,
) -> Vec<f64> {
    (start..=end)
        .map(|frame| tail_point_angle(&data.chain(animal, frame), k))
        .collect()
}

/// Signed angular difference between consecutive chain segments, one
/// value per interior tail point, radians.
pub fn curvature_at_frame(chain: &[Point]) -> Vec<f64> {
    (1..chain.len() - 1)
        .map(|i| {
            let incoming = (chain[i].y - chain[i - 1].y).atan2(chain[i].x - chain[i - 1].x);
            let outgoing = (chain[i + 1].y - chain[i].y).atan2(chain[i + 1].x - chain[i].x);
            angle_diff(outgoing, incoming)
        })
        .collect()
}

/// Centered moving average, window clamped at the series edges.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || values.is_empty() {
        return values.to_vec();
    }
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            values[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
        .collect()
}

/// Indices of bends: local extrema of the smoothed angle series whose
/// value differs from the previous bend by at least `min_amplitude`.
pub fn detect_bends(smoothed: &[f64], min_amplitude: f64) -> Vec<usize> {
    let mut bends: Vec<usize> = Vec::new();
    for i in 1..smoothed.len().saturating_sub(1) {
        let left = smoothed[i] - smoothed[i - 1];
        let right = smoothed[i + 1] - smoothed[i];
        let is_extremum = (left > 0.0 && right <= 0.0) || (left < 0.0 && right >= 0.0);
        if !is_extremum {
            continue;
        }
        let previous = bends.last().map(|&j| smoothed[j]).unwrap_or(0.0);
        if (smoothed[i] - previous).abs() >= min_amplitude {
            bends.push(i);
        }
    }
    bends
}

/// Compute the full parameter record for one bout.
pub fn extract(
    bout: &Bout,
    data: &WellTrackingData,
    animal: usize,
    config: &KinematicsConfig,
    fps: f64,
    pixel_size: f64,
) -> KinematicParameters {
    let bout_duration = bout.nb_frames() as f64 / fps;
    let heads: Vec<Point> = (bout.start..=bout.end)
        .map(|frame| data.head(animal, frame))
        .collect();
    let speeds: Vec<f64> = heads
        .windows(2)
        .map(|w| w[0].distance_to(&w[1]) * pixel_size * fps)
        .collect();
    let total_distance = speeds.iter().sum::<f64>() / fps;

    let tip = data.nb_points() - 1;
    let angles = tail_angle_series(data, animal, tip, bout.start, bout.end);
    let smoothed = moving_average(&angles, config.tail_angle_smoothing_window);
    let bends = detect_bends(&smoothed, config.min_bend_amplitude);
    let amplitudes: Vec<f64> = bends.iter().map(|&i| smoothed[i].abs() * RAD_TO_DEG).collect();
    let tail_beat_frequency = if bout_duration > 0.0 {
        bends.len() as f64 / 2.0 / bout_duration
    } else {
        0.0
    };
    let max_tail_angle = smoothed.iter().fold(0.0f64, |m, a| m.max(a.abs())) * RAD_TO_DEG;

    let yaw = angle_diff(
        data.heading(animal, bout.end),
        data.heading(animal, bout.start),
    )
    .abs()
        * RAD_TO_DEG;

    let mut curvatures: Vec<f64> = Vec::new();
    for frame in bout.start..=bout.end {
        curvatures.extend(
            curvature_at_frame(&data.chain(animal, frame))
                .iter()
                .map(|c| c.abs() * RAD_TO_DEG),
        );
    }

    KinematicParameters {
        bout_duration,
        total_distance,
        mean_speed: mean(&speeds),
        max_speed: max(&speeds),
        median_speed: median(&speeds),
        number_of_bends: bends.len(),
        tail_beat_frequency,
        max_bend_amplitude: max(&amplitudes),
        mean_bend_amplitude: mean(&amplitudes),
        median_bend_amplitude: median(&amplitudes),
        max_tail_angle,
        absolute_yaw: yaw,
        max_abs_curvature: max(&curvatures),
        mean_abs_curvature: mean(&curvatures),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn max(values: &[f64]) -> f64 {
    values.iter().fold(0.0f64, |m, &v| m.max(v))
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    sorted[sorted.len() / 2]
}

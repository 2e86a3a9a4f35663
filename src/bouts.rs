use crate::config::BoutDetectionConfig;
use crate::types::WellTrackingData;

/// Contiguous movement episode of one animal, absolute inclusive frame
/// indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bout {
    pub start: u32,
    pub end: u32,
}

impl Bout {
    pub fn nb_frames(&self) -> u32 {
        self.end - self.start + 1
    }
}

/// Inter-frame head displacement in pixels, one value per tracked frame.
/// The first frame has no predecessor and counts as stationary.
pub fn head_displacement_metric(data: &WellTrackingData, animal: usize) -> Vec<f64> {
    let first = data.first_frame;
    (0..data.nb_frames() as u32)
        .map(|i| {
            if i == 0 {
                0.0
            } else {
                data.head(animal, first + i)
                    .distance_to(&data.head(animal, first + i - 1))
            }
        })
        .collect()
}

/// Segment a per-frame motion metric into bouts. A frame is moving when
/// the metric exceeds the threshold; up to `max_stationary_frames` still
/// frames inside a run do not split it; runs separated by fewer than
/// `min_gap_frames` are merged; runs shorter than `min_bout_frames` are
/// dropped. Returned bouts are ordered and non-overlapping.
pub fn bouts_from_metric(
    metric: &[f64],
    threshold: f64,
    config: &BoutDetectionConfig,
    first_frame: u32,
) -> Vec<Bout> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for (i, &value) in metric.iter().enumerate() {
        if value > threshold {
            current = match current {
                Some((start, _)) => Some((start, i)),
                None => Some((i, i)),
            };
        } else if let Some((start, last)) = current {
            if i - last > config.max_stationary_frames as usize {
                runs.push((start, last));
                current = None;
            }
        }
    }
    if let Some(run) = current {
        runs.push(run);
    }

    let mut merged: Vec<(usize, usize)> = Vec::new();
    for run in runs {
        match merged.last_mut() {
            Some(previous) if run.0 - previous.1 - 1 < config.min_gap_frames as usize => {
                previous.1 = run.1;
            }
            _ => merged.push(run),
        }
    }

    let bouts: Vec<Bout> = merged
        .into_iter()
        .filter(|(start, end)| end - start + 1 >= config.min_bout_frames as usize)
        .map(|(start, end)| Bout {
            start: first_frame + start as u32,
            end: first_frame + end as u32,
        })
        .collect();
    log::debug!("{} bouts detected", bouts.len());
    bouts
}

use crate::background::BackgroundModel;
use crate::bouts::{self, Bout};
use crate::config::{BoutDetectionMode, TrackingConfig};
use crate::kinematics;
use crate::store::{
    animal_key, bout_key, well_key, AnimalResults, BoutRecord, DataPerFrame, HeadPositions,
    VideoResults, WellResults,
};
use crate::tracker::{WellOutput, WellTracker};
use crate::types::{WellBounds, WellTrackingData};
use crate::util::{framenumber_to_hhmmss, ScopedTimer};
use crate::video::FrameSource;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Run the whole engine against one video: background construction,
/// frame loop, bout segmentation, kinematics, results assembly. A decode
/// failure mid-run aborts the run, nothing partial is returned.
pub fn run_tracking(video_path: &str, config: &TrackingConfig) -> Result<VideoResults> {
    config.validate()?;
    let factor = config.effective_downscale();
    let scaled = Arc::new(config.downscaled());
    let mut source = FrameSource::open(video_path, config.video_fps, factor)
        .with_context(|| format!("Could not open {}", video_path))?;
    anyhow::ensure!(source.info.frame_count > 0, "{}: no frames", video_path);
    let last_frame = match config.last_frame {
        Some(last) => last.min(source.info.frame_count - 1),
        None => source.info.frame_count - 1,
    };
    anyhow::ensure!(
        config.first_frame <= last_frame,
        "firstFrame {} is past the end of {} ({} frames)",
        config.first_frame,
        video_path,
        source.info.frame_count
    );
    let nb_frames = (last_frame - config.first_frame + 1) as usize;
    for well in &scaled.wells {
        let bounds = well.bounds();
        anyhow::ensure!(
            bounds.x + bounds.width <= source.info.width
                && bounds.y + bounds.height <= source.info.height,
            "Well {:?} does not fit the {}x{} frames",
            well,
            source.info.width,
            source.info.height
        );
    }
    let wells_to_track: Vec<usize> = match config.only_track_this_one_well {
        Some(well) => vec![well],
        None => (0..config.wells.len()).collect(),
    };

    let mut trackers = build_trackers(
        &mut source,
        &scaled,
        &wells_to_track,
        config.first_frame,
        nb_frames,
    )?;

    source.seek(config.first_frame)?;
    log::info!(
        "Tracking {} wells of {} over frames {}..={}",
        trackers.len(),
        video_path,
        config.first_frame,
        last_frame
    );
    for frame_number in config.first_frame..=last_frame {
        let frame = {
            let _timer = ScopedTimer::new("duration.frame_decode");
            source
                .next_frame()?
                .with_context(|| format!("{}: decode failed at frame {}", video_path, frame_number))?
        };
        trackers
            .par_iter_mut()
            .for_each(|tracker| tracker.process_frame(&frame, frame_number));
        let interval = config.progress_log_interval;
        if interval > 0 && frame_number % interval == 0 {
            log::info!(
                "Tracking at frame {} ({})",
                frame_number,
                framenumber_to_hhmmss(frame_number, config.video_fps)
            );
        }
    }

    let mut outputs: Vec<WellOutput> = trackers.into_iter().map(WellTracker::into_output).collect();
    if factor > 1 {
        for output in &mut outputs {
            output.data.scale_coordinates(factor as f64);
        }
    }

    let inline_threshold = scaled.bout_detection.min_moved_pixels_inline;
    let mut wells = BTreeMap::new();
    for output in &outputs {
        let animals: Vec<AnimalResults> = (0..output.data.nb_animals())
            .into_par_iter()
            .map(|animal| {
                let bouts = detect_bouts(config, inline_threshold, &output.data, animal, &output.moved_pixels);
                assemble_animal(config, &output.data, animal, &bouts)
            })
            .collect();
        let mut group = BTreeMap::new();
        for (j, animal) in animals.into_iter().enumerate() {
            group.insert(animal_key(j), animal);
        }
        wells.insert(well_key(output.well_index), WellResults { animals: group });
    }

    Ok(VideoResults {
        video_fps: Some(config.video_fps),
        video_pixel_size: Some(config.video_pixel_size),
        first_frame: config.first_frame,
        last_frame,
        creation_date: chrono::Local::now().to_rfc3339(),
        wells,
    })
}

/// Decode the two background reference frames and build one tracker per
/// well. The second reference defaults to the final frame of the video.
fn build_trackers(
    source: &mut FrameSource,
    scaled: &Arc<TrackingConfig>,
    wells_to_track: &[usize],
    first_frame: u32,
    nb_frames: usize,
) -> Result<Vec<WellTracker>> {
    let reference_b = scaled
        .background
        .last_frame_for_initial_detect
        .map(|frame| frame.min(source.info.frame_count - 1))
        .unwrap_or(source.info.frame_count - 1);
    source.seek(first_frame)?;
    let frame_a = source
        .next_frame()?
        .context("Could not decode the first background reference frame")?;
    source.seek(reference_b)?;
    let frame_b = source
        .next_frame()?
        .context("Could not decode the second background reference frame")?;

    let inline = scaled.bout_detection.mode == BoutDetectionMode::InlineFrameDiff;
    let trackers = wells_to_track
        .iter()
        .map(|&well| {
            let bounds = if scaled.background.subtract_on_whole_image {
                WellBounds::full_frame(source.info.width, source.info.height)
            } else {
                scaled.wells[well].bounds()
            };
            let background = BackgroundModel::build(&frame_a, &frame_b, bounds, scaled.background.mode);
            WellTracker::new(well, scaled.clone(), background, first_frame, nb_frames, inline)
        })
        .collect();
    Ok(trackers)
}

fn detect_bouts(
    config: &TrackingConfig,
    inline_threshold: u32,
    data: &WellTrackingData,
    animal: usize,
    moved_pixels: &[u32],
) -> Vec<Bout> {
    let detection = &config.bout_detection;
    match detection.mode {
        BoutDetectionMode::PostHocDisplacement => {
            let metric = bouts::head_displacement_metric(data, animal);
            bouts::bouts_from_metric(
                &metric,
                detection.displacement_threshold_px,
                detection,
                data.first_frame,
            )
        }
        BoutDetectionMode::InlineFrameDiff => {
            let metric: Vec<f64> = moved_pixels.iter().map(|&count| count as f64).collect();
            bouts::bouts_from_metric(&metric, inline_threshold as f64, detection, data.first_frame)
        }
    }
}

/// Assemble one animal's per-frame columns and bout records. Heatmap and
/// curvature columns hold values inside bouts and nulls elsewhere.
fn assemble_animal(
    config: &TrackingConfig,
    data: &WellTrackingData,
    animal: usize,
    bouts: &[Bout],
) -> AnimalResults {
    let nb_frames = data.nb_frames();
    let nb_points = data.nb_points();
    let first = data.first_frame;

    let mut head_pos = HeadPositions::default();
    let mut tail_pos_x = vec![Vec::with_capacity(nb_frames); nb_points];
    let mut tail_pos_y = vec![Vec::with_capacity(nb_frames); nb_points];
    let mut tail_length = Vec::with_capacity(nb_frames);
    for i in 0..nb_frames as u32 {
        let chain = data.chain(animal, first + i);
        head_pos.x.push(chain[0].x);
        head_pos.y.push(chain[0].y);
        for (k, point) in chain.iter().enumerate() {
            tail_pos_x[k].push(point.x);
            tail_pos_y[k].push(point.y);
        }
        tail_length.push(data.tail_length(animal, first + i));
    }

    // one angle trace per tail point past the head; the heatmap keeps the
    // configured number of traces counted from the tip
    let traces = nb_points - 1;
    let keep = config
        .kinematics
        .heatmap_nb_points
        .unwrap_or(traces)
        .min(traces);
    let first_trace = traces - keep;
    let mut heatmap = vec![vec![None; nb_frames]; keep];
    let mut curvature = vec![vec![None; nb_frames]; nb_points - 2];
    for bout in bouts {
        for k in 1..nb_points {
            let trace = k - 1;
            if trace < first_trace {
                continue;
            }
            let angles = kinematics::tail_angle_series(data, animal, k, bout.start, bout.end);
            let smoothed =
                kinematics::moving_average(&angles, config.kinematics.tail_angle_smoothing_window);
            for (offset, angle) in smoothed.iter().enumerate() {
                let i = (bout.start - first) as usize + offset;
                heatmap[trace - first_trace][i] = Some(angle * kinematics::RAD_TO_DEG);
            }
        }
        for frame in bout.start..=bout.end {
            let i = (frame - first) as usize;
            let values = kinematics::curvature_at_frame(&data.chain(animal, frame));
            for (r, value) in values.iter().enumerate() {
                curvature[r][i] = Some(value * kinematics::RAD_TO_DEG);
            }
        }
    }

    let mut list_of_bouts = BTreeMap::new();
    for (m, bout) in bouts.iter().enumerate() {
        let parameters = kinematics::extract(
            bout,
            data,
            animal,
            &config.kinematics,
            config.video_fps,
            config.video_pixel_size,
        );
        list_of_bouts.insert(
            bout_key(m),
            BoutRecord {
                start: bout.start,
                end: bout.end,
                parameters,
            },
        );
    }

    AnimalResults {
        data_per_frame: DataPerFrame {
            head_pos,
            tail_pos_x,
            tail_pos_y,
            tail_angle_heatmap: heatmap,
            curvature,
            tail_length,
        },
        list_of_bouts,
    }
}

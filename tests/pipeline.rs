use image::{GrayImage, Luma};
use larvatrack::config::{BoutDetectionMode, TrackingConfig};
use larvatrack::run::run_tracking;
use larvatrack::store::{animal_key, bout_key, well_key, ResultsStore, StoreError, VideoResults};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::Path;

const WIDTH: u32 = 120;
const HEIGHT: u32 = 90;
const NB_FRAMES: u32 = 100;
const FISH_LENGTH: u32 = 20;
const HEAD_X: u32 = 30;
const REST_Y: u32 = 45;
const MOTION_WINDOWS: [(u32, u32); 3] = [(10, 20), (40, 55), (70, 90)];

fn test_config() -> TrackingConfig {
    serde_json::from_str(
        r#"{
            "videoFPS": 25.0,
            "videoPixelSize": 0.05,
            "wells": [
                { "shape": "rectangle", "topLeftX": 5, "topLeftY": 20, "width": 110, "height": 50 }
            ],
            "nbTailPoints": 8,
            "tailSearch": { "maxTailLengthPx": 21.0, "stepPx": 3.0 },
            "headDetection": { "gaussianBlurKernel": 0, "maxHeadPixelValue": 80 },
            "boutDetection": {
                "displacementThresholdPx": 1.5,
                "maxStationaryFrames": 5,
                "minBoutFrames": 3
            }
        }"#,
    )
    .unwrap()
}

/// Static sensor-noise pattern, identical in every frame so that
/// stationary intervals subtract out exactly.
fn noise_pattern() -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..WIDTH * HEIGHT).map(|_| rng.gen_range(0..6)).collect()
}

fn draw_frame(head_y: u32, noise: &[u8]) -> GrayImage {
    let mut frame = GrayImage::from_fn(WIDTH, HEIGHT, |x, y| {
        Luma([230 - noise[(y * WIDTH + x) as usize]])
    });
    for x in HEAD_X..HEAD_X + FISH_LENGTH {
        frame.put_pixel(x, head_y, Luma([0]));
        frame.put_pixel(x, head_y + 1, Luma([25]));
    }
    frame
}

/// Vertical zigzag inside the motion windows, stationary elsewhere.
fn head_y_at(frame: u32) -> u32 {
    for (start, end) in MOTION_WINDOWS {
        if frame >= start && frame <= end {
            return if (frame - start) % 2 == 0 { REST_Y + 3 } else { REST_Y - 3 };
        }
    }
    REST_Y
}

fn write_video(dir: &Path, stationary: bool) {
    let noise = noise_pattern();
    for frame_number in 0..NB_FRAMES {
        let head_y = if stationary { REST_Y } else { head_y_at(frame_number) };
        draw_frame(head_y, &noise)
            .save(dir.join(format!("frame_{:04}.png", frame_number)))
            .unwrap();
    }
}

fn tracked_results(config: &TrackingConfig, stationary: bool) -> VideoResults {
    let dir = tempfile::tempdir().unwrap();
    write_video(dir.path(), stationary);
    run_tracking(dir.path().to_str().unwrap(), config).unwrap()
}

fn bout_bounds(results: &VideoResults) -> Vec<(u32, u32)> {
    let animal = &results.wells[&well_key(0)].animals[&animal_key(0)];
    (0..animal.list_of_bouts.len())
        .map(|m| {
            let record = &animal.list_of_bouts[&bout_key(m)];
            (record.start, record.end)
        })
        .collect()
}

#[test]
fn motion_windows_become_bouts() {
    let results = tracked_results(&test_config(), false);
    let bouts = bout_bounds(&results);
    assert_eq!(bouts.len(), 3, "bouts {:?}", bouts);
    for ((start, end), (expected_start, expected_end)) in bouts.iter().zip(MOTION_WINDOWS) {
        assert!(
            (*start as i64 - expected_start as i64).abs() <= 2,
            "bout start {} vs expected {}",
            start,
            expected_start
        );
        assert!(
            (*end as i64 - expected_end as i64).abs() <= 2,
            "bout end {} vs expected {}",
            end,
            expected_end
        );
    }
    // ordered and non-overlapping
    for pair in bouts.windows(2) {
        assert!(pair[0].1 < pair[1].0);
    }
    for (start, end) in &bouts {
        assert!(end >= start);
    }
}

#[test]
fn every_frame_has_the_configured_tail_points() {
    let config = test_config();
    let results = tracked_results(&config, false);
    let data = &results.wells[&well_key(0)].animals[&animal_key(0)].data_per_frame;
    assert_eq!(data.tail_pos_x.len(), config.nb_tail_points);
    assert_eq!(data.tail_pos_y.len(), config.nb_tail_points);
    for column in data.tail_pos_x.iter().chain(data.tail_pos_y.iter()) {
        assert_eq!(column.len(), NB_FRAMES as usize);
    }
    assert_eq!(data.head_pos.x.len(), NB_FRAMES as usize);
    assert_eq!(results.first_frame, 0);
    assert_eq!(results.last_frame, NB_FRAMES - 1);
}

#[test]
fn stationary_video_has_no_bouts() {
    let results = tracked_results(&test_config(), true);
    let animal = &results.wells[&well_key(0)].animals[&animal_key(0)];
    assert!(animal.list_of_bouts.is_empty());
    for column in &animal.data_per_frame.tail_angle_heatmap {
        assert!(column.iter().all(|value| value.is_none()));
    }
}

#[test]
fn inline_frame_diff_mode_finds_the_same_windows() {
    let mut config = test_config();
    config.bout_detection.mode = BoutDetectionMode::InlineFrameDiff;
    config.bout_detection.min_moved_pixels_inline = 20;
    let results = tracked_results(&config, false);
    let bouts = bout_bounds(&results);
    assert_eq!(bouts.len(), 3, "bouts {:?}", bouts);
    for ((start, end), (expected_start, expected_end)) in bouts.iter().zip(MOTION_WINDOWS) {
        assert!((*start as i64 - expected_start as i64).abs() <= 2);
        assert!((*end as i64 - expected_end as i64).abs() <= 2);
    }
}

#[test]
fn parameters_survive_a_store_reload_cycle() {
    let results = tracked_results(&test_config(), false);
    let dir = tempfile::tempdir().unwrap();
    let store = ResultsStore::new(dir.path());
    store.write("synthetic", &results).unwrap();

    let animal = &results.wells[&well_key(0)].animals[&animal_key(0)];
    for m in 0..animal.list_of_bouts.len() {
        let expected = &animal.list_of_bouts[&bout_key(m)].parameters;
        let loaded = store
            .get_kinematic_parameters_per_bout("synthetic", 0, 0, m)
            .unwrap();
        assert_eq!(&loaded, expected);
    }
    assert!(matches!(
        store.get_kinematic_parameters_per_bout("synthetic", 0, 0, animal.list_of_bouts.len()),
        Err(StoreError::Range(_))
    ));
}

#[test]
fn curvature_query_matches_the_bout_shape() {
    let config = test_config();
    let results = tracked_results(&config, false);
    let dir = tempfile::tempdir().unwrap();
    let store = ResultsStore::new(dir.path());
    store.write("synthetic", &results).unwrap();

    let animal = &results.wells[&well_key(0)].animals[&animal_key(0)];
    let record = &animal.list_of_bouts[&bout_key(0)];
    let (curvature, times, arcs) = store.get_curvature_per_bout("synthetic", 0, 0, 0).unwrap();
    let cols = (record.end - record.start + 1) as usize;
    assert_eq!(curvature.dim(), (config.nb_tail_points - 2, cols));
    assert_eq!(times.dim(), curvature.dim());
    assert_eq!(arcs.dim(), curvature.dim());
    // time of the first column is the bout start truncated to 10ms
    let expected = (100.0 * (record.start as f64 / config.video_fps)).trunc() / 100.0;
    assert!((times[[0, 0]] - expected).abs() < 1e-9);
    // distances along the tail decrease towards the tip
    for r in 1..arcs.dim().0 {
        assert!(arcs[[r, 0]] <= arcs[[r - 1, 0]]);
    }
    assert!(curvature.iter().all(|value| value.is_finite()));
}

#[test]
fn heatmap_queries_validate_the_time_interval() {
    let results = tracked_results(&test_config(), false);
    let dir = tempfile::tempdir().unwrap();
    let store = ResultsStore::new(dir.path());
    store.write("synthetic", &results).unwrap();

    assert!(matches!(
        store.get_tail_angle_heatmap_per_time_interval("synthetic", 0, 0, 1.0, 1.0),
        Err(StoreError::Range(_))
    ));
    assert!(matches!(
        store.get_tail_angle_heatmap_per_time_interval("synthetic", 0, 0, 2.0, 1.0),
        Err(StoreError::Range(_))
    ));
    // past the end of the tracked range (99 frames at 25 fps is 3.96s)
    assert!(matches!(
        store.get_tail_angle_heatmap_per_time_interval("synthetic", 0, 0, 0.0, 5.0),
        Err(StoreError::Range(_))
    ));

    let (columns, start_frame, _) = store
        .get_tail_angle_heatmap_per_time_interval("synthetic", 0, 0, 0.4, 1.0)
        .unwrap();
    assert_eq!(start_frame, 10);
    assert_eq!(columns.len(), test_config().nb_tail_points - 1);
    for column in &columns {
        // frames 10..25 at 25 fps
        assert_eq!(column.len(), 15);
        // the first motion window is inside the requested interval
        assert!(column.iter().any(|value| value.is_some()));
    }
}

#[test]
fn absent_well_or_animal_is_not_found() {
    let results = tracked_results(&test_config(), true);
    let dir = tempfile::tempdir().unwrap();
    let store = ResultsStore::new(dir.path());
    store.write("synthetic", &results).unwrap();

    assert!(matches!(
        store.get_kinematic_parameters_per_bout("synthetic", 4, 0, 0),
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.get_kinematic_parameters_per_bout("synthetic", 0, 3, 0),
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.get_kinematic_parameters_per_bout("missing", 0, 0, 0),
        Err(StoreError::NotFound(_))
    ));
}

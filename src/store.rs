use crate::kinematics::KinematicParameters;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Typed query errors surfaced to external analysis tooling.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} doesn't exist")]
    NotFound(String),
    #[error("{0}")]
    Precondition(String),
    #[error("{0}")]
    Range(String),
    #[error("could not read results: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse results: {0}")]
    Parse(#[from] serde_json::Error),
}

pub fn well_key(well: usize) -> String {
    format!("dataForWell{}", well)
}

pub fn animal_key(animal: usize) -> String {
    format!("dataForAnimal{}", animal)
}

pub fn bout_key(bout: usize) -> String {
    format!("bout{}", bout)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct HeadPositions {
    #[serde(rename = "X")]
    pub x: Vec<f64>,
    #[serde(rename = "Y")]
    pub y: Vec<f64>,
}

/// Named columnar per-frame arrays of one animal, each indexed
/// 0..(lastFrame - firstFrame).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DataPerFrame {
    #[serde(rename = "HeadPos")]
    pub head_pos: HeadPositions,
    /// One column per tail point, column k holding that point's
    /// x coordinate over all frames.
    #[serde(rename = "TailPosX")]
    pub tail_pos_x: Vec<Vec<f64>>,
    #[serde(rename = "TailPosY")]
    pub tail_pos_y: Vec<Vec<f64>>,
    /// Smoothed per-point tail angles in degrees, null outside bouts.
    #[serde(rename = "tailAngleHeatmap")]
    pub tail_angle_heatmap: Vec<Vec<Option<f64>>>,
    /// Segment-to-segment angles in degrees, one column per interior
    /// tail point, null outside bouts.
    #[serde(rename = "curvature")]
    pub curvature: Vec<Vec<Option<f64>>>,
    /// Chain arc length in pixels per frame.
    #[serde(rename = "TailLength")]
    pub tail_length: Vec<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BoutRecord {
    /// Absolute frame indices, inclusive.
    #[serde(rename = "BoutStart")]
    pub start: u32,
    #[serde(rename = "BoutEnd")]
    pub end: u32,
    #[serde(rename = "kinematicParametersPerBout")]
    pub parameters: KinematicParameters,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct AnimalResults {
    #[serde(rename = "dataPerFrame")]
    pub data_per_frame: DataPerFrame,
    #[serde(rename = "listOfBouts")]
    pub list_of_bouts: BTreeMap<String, BoutRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct WellResults {
    #[serde(flatten)]
    pub animals: BTreeMap<String, AnimalResults>,
}

/// One video's persisted hierarchy: root attributes plus per-well groups
/// keyed `dataForWell{i}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VideoResults {
    #[serde(rename = "videoFPS")]
    pub video_fps: Option<f64>,
    #[serde(rename = "videoPixelSize")]
    pub video_pixel_size: Option<f64>,
    #[serde(rename = "firstFrame")]
    pub first_frame: u32,
    #[serde(rename = "lastFrame")]
    pub last_frame: u32,
    #[serde(rename = "creationDate")]
    pub creation_date: String,
    #[serde(flatten)]
    pub wells: BTreeMap<String, WellResults>,
}

/// Hierarchical results store, one JSON document per video under a root
/// directory. Writes are single-writer per video; the read accessors are
/// the query API consumed by external report tooling.
pub struct ResultsStore {
    root: PathBuf,
}

impl ResultsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn results_path(&self, video: &str) -> PathBuf {
        self.root.join(format!("{}.json", video))
    }

    pub fn write(&self, video: &str, results: &VideoResults) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root)?;
        let file = std::fs::File::create(self.results_path(video))?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer(writer, results)?;
        Ok(())
    }

    pub fn load(&self, video: &str) -> Result<VideoResults, StoreError> {
        let path = self.results_path(video);
        if !path.exists() {
            return Err(StoreError::NotFound(format!(
                "video {} in the results folder {}",
                video,
                self.root.display()
            )));
        }
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn get_kinematic_parameters_per_bout(
        &self,
        video: &str,
        well: usize,
        animal: usize,
        bout: usize,
    ) -> Result<KinematicParameters, StoreError> {
        let results = self.load(video)?;
        let group = animal_group(&results, well, animal)?;
        let number_of_bouts = group.list_of_bouts.len();
        if bout >= number_of_bouts {
            return Err(StoreError::Range(format!(
                "cannot get data for bout {}, total number of detected bouts is {}",
                bout, number_of_bouts
            )));
        }
        let record = group
            .list_of_bouts
            .get(&bout_key(bout))
            .ok_or_else(|| StoreError::NotFound(bout_description(well, animal, bout)))?;
        Ok(record.parameters.clone())
    }

    /// Curvature of one bout as three matrices: values, time in seconds
    /// (truncated to two decimals), and distance along the tail from each
    /// point to the tip. Rows are interior tail points, columns frames.
    pub fn get_curvature_per_bout(
        &self,
        video: &str,
        well: usize,
        animal: usize,
        bout: usize,
    ) -> Result<(Array2<f64>, Array2<f64>, Array2<f64>), StoreError> {
        let results = self.load(video)?;
        let (fps, pixel_size) = scalar_metadata(&results)?;
        let group = animal_group(&results, well, animal)?;
        let record = group
            .list_of_bouts
            .get(&bout_key(bout))
            .ok_or_else(|| StoreError::NotFound(bout_description(well, animal, bout)))?;
        let data = &group.data_per_frame;
        let start = (record.start - results.first_frame) as usize;
        let rows = data.curvature.len();
        let cols = (record.end - record.start) as usize + 1;

        let mut curvature = Array2::zeros((rows, cols));
        for (r, column) in data.curvature.iter().enumerate() {
            for c in 0..cols {
                curvature[[r, c]] = column[start + c].unwrap_or(f64::NAN);
            }
        }

        let mut time_values = Array2::zeros((rows, cols));
        for c in 0..cols {
            let t = (100.0 * ((c as u32 + record.start) as f64 / fps)).trunc() / 100.0;
            time_values.column_mut(c).fill(t);
        }

        // distance from each interior point to the tip, suffix-cumulative
        // over the inter-point distances of that frame's chain
        let mut arc_lengths = Array2::zeros((rows, cols));
        for c in 0..cols {
            for r in 0..rows {
                let dx = data.tail_pos_x[r + 2][start + c] - data.tail_pos_x[r + 1][start + c];
                let dy = data.tail_pos_y[r + 2][start + c] - data.tail_pos_y[r + 1][start + c];
                arc_lengths[[r, c]] = (dx * dx + dy * dy).sqrt() * pixel_size;
            }
            for r in (0..rows.saturating_sub(1)).rev() {
                arc_lengths[[r, c]] += arc_lengths[[r + 1, c]];
            }
        }

        Ok((curvature, time_values, arc_lengths))
    }

    /// Per-point tail angle columns over a time interval, plus the first
    /// returned frame index and the animal's tail length in pixels.
    pub fn get_tail_angle_heatmap_per_time_interval(
        &self,
        video: &str,
        well: usize,
        animal: usize,
        start_time_in_seconds: f64,
        end_time_in_seconds: f64,
    ) -> Result<(Vec<Vec<Option<f64>>>, u32, f64), StoreError> {
        if start_time_in_seconds >= end_time_in_seconds {
            return Err(StoreError::Range(
                "end time must be larger than start time".to_string(),
            ));
        }
        let results = self.load(video)?;
        let (fps, _) = scalar_metadata(&results)?;
        let first_frame_in_seconds = results.first_frame as f64 / fps;
        let last_frame_in_seconds = results.last_frame as f64 / fps;
        if start_time_in_seconds < first_frame_in_seconds
            || end_time_in_seconds > last_frame_in_seconds
        {
            return Err(StoreError::Range(format!(
                "tracking was performed from {}s to {}s, start and end times must be within this interval",
                first_frame_in_seconds, last_frame_in_seconds
            )));
        }
        let group = animal_group(&results, well, animal)?;
        let start_frame = (start_time_in_seconds * fps) as u32;
        let interval_start = (start_frame.saturating_sub(results.first_frame)) as usize;
        let interval_end =
            ((end_time_in_seconds * fps) as u32).saturating_sub(results.first_frame) as usize;
        let columns = group
            .data_per_frame
            .tail_angle_heatmap
            .iter()
            .map(|column| column[interval_start..interval_end].to_vec())
            .collect();
        let tail_length = group
            .data_per_frame
            .tail_length
            .first()
            .copied()
            .unwrap_or(0.0);
        Ok((columns, start_frame, tail_length))
    }
}

fn animal_group<'a>(
    results: &'a VideoResults,
    well: usize,
    animal: usize,
) -> Result<&'a AnimalResults, StoreError> {
    let well_group = results
        .wells
        .get(&well_key(well))
        .ok_or_else(|| StoreError::NotFound(format!("data for well {}", well)))?;
    well_group.animals.get(&animal_key(animal)).ok_or_else(|| {
        StoreError::NotFound(format!("data for animal {} in well {}", animal, well))
    })
}

fn scalar_metadata(results: &VideoResults) -> Result<(f64, f64), StoreError> {
    let fps = results.video_fps.ok_or_else(|| {
        StoreError::Precondition("videoFPS is not set for this video".to_string())
    })?;
    let pixel_size = results.video_pixel_size.ok_or_else(|| {
        StoreError::Precondition("videoPixelSize is not set for this video".to_string())
    })?;
    Ok((fps, pixel_size))
}

fn bout_description(well: usize, animal: usize, bout: usize) -> String {
    format!("bout {} for animal {} in well {}", bout, animal, well)
}

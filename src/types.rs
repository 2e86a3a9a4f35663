use ndarray::{Array2, Array4};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Pixel rectangle in frame coordinates, used for well regions and
/// background buffers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct WellBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl WellBounds {
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Region of interest isolating one animal group. Circular wells are
/// tracked within their bounding rectangle, the circle only constrains
/// point-in-well tests.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "shape", rename_all = "camelCase")]
pub enum WellGeometry {
    #[serde(rename_all = "camelCase")]
    Rectangle {
        top_left_x: u32,
        top_left_y: u32,
        width: u32,
        height: u32,
    },
    #[serde(rename_all = "camelCase")]
    Circle {
        center_x: u32,
        center_y: u32,
        radius: u32,
    },
}

impl WellGeometry {
    pub fn bounds(&self) -> WellBounds {
        match *self {
            WellGeometry::Rectangle {
                top_left_x,
                top_left_y,
                width,
                height,
            } => WellBounds {
                x: top_left_x,
                y: top_left_y,
                width,
                height,
            },
            WellGeometry::Circle {
                center_x,
                center_y,
                radius,
            } => WellBounds {
                x: center_x.saturating_sub(radius),
                y: center_y.saturating_sub(radius),
                width: 2 * radius,
                height: 2 * radius,
            },
        }
    }

    /// Point-in-well test in absolute frame coordinates.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        match *self {
            WellGeometry::Rectangle {
                top_left_x,
                top_left_y,
                width,
                height,
            } => {
                x >= top_left_x as f64
                    && x < (top_left_x + width) as f64
                    && y >= top_left_y as f64
                    && y < (top_left_y + height) as f64
            }
            WellGeometry::Circle {
                center_x,
                center_y,
                radius,
            } => {
                let dx = x - center_x as f64;
                let dy = y - center_y as f64;
                dx * dx + dy * dy <= (radius * radius) as f64
            }
        }
    }

    pub fn downscaled(&self, factor: u32) -> Self {
        if factor <= 1 {
            return *self;
        }
        match *self {
            WellGeometry::Rectangle {
                top_left_x,
                top_left_y,
                width,
                height,
            } => WellGeometry::Rectangle {
                top_left_x: top_left_x / factor,
                top_left_y: top_left_y / factor,
                width: width / factor,
                height: height / factor,
            },
            WellGeometry::Circle {
                center_x,
                center_y,
                radius,
            } => WellGeometry::Circle {
                center_x: center_x / factor,
                center_y: center_y / factor,
                radius: radius / factor,
            },
        }
    }
}

/// Orientation derived from the first two tail chain points. The angle
/// faces away from the tail, normalized to [0, 2*pi).
pub fn heading_from_segment(head: &Point, next: &Point) -> f64 {
    ((next.y - head.y).atan2(next.x - head.x) + std::f64::consts::PI)
        .rem_euclid(std::f64::consts::TAU)
}

/// Signed angular difference a - b, wrapped to (-pi, pi].
pub fn angle_diff(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(std::f64::consts::TAU);
    if d > std::f64::consts::PI {
        d - std::f64::consts::TAU
    } else {
        d
    }
}

/// Dense per-well tracking buffer, allocated once before the frame loop
/// and filled incrementally. Coordinates are well-local, frame indices
/// absolute within [first_frame, first_frame + nb_frames).
pub struct WellTrackingData {
    points: Array4<f64>,
    headings: Array2<f64>,
    pub first_frame: u32,
}

impl WellTrackingData {
    pub fn new(nb_animals: usize, nb_frames: usize, nb_points: usize, first_frame: u32) -> Self {
        Self {
            points: Array4::zeros((nb_animals, nb_frames, nb_points, 2)),
            headings: Array2::zeros((nb_animals, nb_frames)),
            first_frame,
        }
    }

    pub fn nb_animals(&self) -> usize {
        self.points.shape()[0]
    }

    pub fn nb_frames(&self) -> usize {
        self.points.shape()[1]
    }

    pub fn nb_points(&self) -> usize {
        self.points.shape()[2]
    }

    fn idx(&self, frame: u32) -> usize {
        debug_assert!(frame >= self.first_frame);
        (frame - self.first_frame) as usize
    }

    pub fn set_chain(&mut self, animal: usize, frame: u32, chain: &[Point]) {
        let f = self.idx(frame);
        for (k, p) in chain.iter().enumerate() {
            self.points[[animal, f, k, 0]] = p.x;
            self.points[[animal, f, k, 1]] = p.y;
        }
    }

    pub fn set_heading(&mut self, animal: usize, frame: u32, heading: f64) {
        let f = self.idx(frame);
        self.headings[[animal, f]] = heading;
    }

    pub fn chain(&self, animal: usize, frame: u32) -> Vec<Point> {
        let f = self.idx(frame);
        (0..self.nb_points())
            .map(|k| Point::new(self.points[[animal, f, k, 0]], self.points[[animal, f, k, 1]]))
            .collect()
    }

    pub fn point(&self, animal: usize, frame: u32, k: usize) -> Point {
        let f = self.idx(frame);
        Point::new(self.points[[animal, f, k, 0]], self.points[[animal, f, k, 1]])
    }

    pub fn head(&self, animal: usize, frame: u32) -> Point {
        self.point(animal, frame, 0)
    }

    pub fn heading(&self, animal: usize, frame: u32) -> f64 {
        let f = self.idx(frame);
        self.headings[[animal, f]]
    }

    /// Multiply every stored coordinate, used to restore original pixel
    /// coordinates after tracking on downscaled frames. Headings are
    /// scale-invariant.
    pub fn scale_coordinates(&mut self, factor: f64) {
        self.points.mapv_inplace(|v| v * factor);
    }

    /// Arc length of the stored chain at one frame, in pixels.
    pub fn tail_length(&self, animal: usize, frame: u32) -> f64 {
        let chain = self.chain(animal, frame);
        chain
            .windows(2)
            .map(|w| w[0].distance_to(&w[1]))
            .sum()
    }
}

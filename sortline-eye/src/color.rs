//! Color segmentation by HSV thresholding

use crate::decoder::Frame;
use sortline_core::config::{ColorProfile, HsvRange, VisionConfig};
use tracing::debug;

/// Connected region of one palette color, in pixel coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct ColorRegion {
    pub color: String,
    /// Area of the outer contour, a polygon through boundary pixel centers
    pub area: f64,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub center_x: u32,
    pub center_y: u32,
}

/// Finds palette colors in a frame
#[derive(Debug, Clone)]
pub struct ColorSegmenter {
    palette: Vec<ColorProfile>,
    min_area: f64,
}

impl ColorSegmenter {
    pub fn new(palette: Vec<ColorProfile>, min_area: f64) -> Self {
        Self { palette, min_area }
    }

    pub fn from_config(config: &VisionConfig) -> Self {
        Self::new(config.colors.clone(), config.min_color_area)
    }

    pub fn palette(&self) -> &[ColorProfile] {
        &self.palette
    }

    /// Regions strictly larger than the minimum area, palette order then scan order
    pub fn segment(&self, frame: &Frame) -> Vec<ColorRegion> {
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let hsv: Vec<[u8; 3]> = frame
            .as_rgb()
            .pixels()
            .map(|p| rgb_to_hsv(p.0[0], p.0[1], p.0[2]))
            .collect();

        let mut regions = Vec::new();
        for profile in &self.palette {
            let mask = build_mask(&hsv, &profile.ranges);
            let found = external_regions(&mask, width, height);
            let before = regions.len();
            regions.extend(
                found
                    .into_iter()
                    .filter(|r| r.area > self.min_area)
                    .map(|r| r.into_color_region(&profile.name)),
            );
            debug!("Color '{}': {} regions above threshold", profile.name, regions.len() - before);
        }
        regions
    }
}

/// Convert 8-bit RGB to 8-bit HSV (H in 0..=180, S and V in 0..=255)
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = max - min;

    let s = if max > 0.0 { diff * 255.0 / max } else { 0.0 };

    let mut h = if diff == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / diff
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }

    [
        (h / 2.0).round().min(180.0) as u8,
        s.round().min(255.0) as u8,
        max as u8,
    ]
}

/// Union of every range's mask
fn build_mask(hsv: &[[u8; 3]], ranges: &[HsvRange]) -> Vec<bool> {
    hsv.iter()
        .map(|px| ranges.iter().any(|range| range.contains(*px)))
        .collect()
}

struct RawRegion {
    /// Area enclosed by the outer contour
    area: f64,
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
}

impl RawRegion {
    fn into_color_region(self, color: &str) -> ColorRegion {
        let width = (self.max_x - self.min_x + 1) as u32;
        let height = (self.max_y - self.min_y + 1) as u32;
        let x = self.min_x as u32;
        let y = self.min_y as u32;
        ColorRegion {
            color: color.to_string(),
            area: self.area,
            x,
            y,
            width,
            height,
            center_x: x + width / 2,
            center_y: y + height / 2,
        }
    }
}

/// 8-connected components of the mask, in raster order of their first pixel
fn external_regions(mask: &[bool], width: usize, height: usize) -> Vec<RawRegion> {
    let mut label = vec![0u32; mask.len()];
    let mut regions: Vec<RawRegion> = Vec::new();
    let mut stack = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || label[start] != 0 {
            continue;
        }
        let id = regions.len() as u32 + 1;
        let mut region = RawRegion {
            area: 0.0,
            min_x: usize::MAX,
            min_y: usize::MAX,
            max_x: 0,
            max_y: 0,
        };

        label[start] = id;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % width, idx / width);
            region.min_x = region.min_x.min(x);
            region.min_y = region.min_y.min(y);
            region.max_x = region.max_x.max(x);
            region.max_y = region.max_y.max(y);

            for (dx, dy) in NEIGHBOURS {
                if let Some(n) = step(x, y, dx, dy, width, height) {
                    if mask[n] && label[n] == 0 {
                        label[n] = id;
                        stack.push(n);
                    }
                }
            }
        }

        let contour = trace_outer_contour(&label, id, start, width, height);
        region.area = polygon_area(&contour);
        regions.push(region);
    }

    regions
}

/// Neighbour offsets in counter-clockwise order as seen on screen, starting east
const NEIGHBOURS: [(i64, i64); 8] = [
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

const WEST: usize = 4;

fn step(x: usize, y: usize, dx: i64, dy: i64, width: usize, height: usize) -> Option<usize> {
    let nx = x as i64 + dx;
    let ny = y as i64 + dy;
    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
        return None;
    }
    Some(ny as usize * width + nx as usize)
}

/// Direction index of `to` as seen from `from`; the two must be adjacent
fn direction(from: usize, to: usize, width: usize) -> usize {
    let dx = (to % width) as i64 - (from % width) as i64;
    let dy = (to / width) as i64 - (from / width) as i64;
    NEIGHBOURS
        .iter()
        .position(|&offset| offset == (dx, dy))
        .unwrap_or(WEST)
}

/// Border following over the component labelled `id`.
///
/// `start` must be the component's first pixel in raster order, so its west
/// neighbour is background. Returns boundary pixel coordinates in walk order.
fn trace_outer_contour(label: &[u32], id: u32, start: usize, width: usize, height: usize) -> Vec<(i64, i64)> {
    let at = |idx: usize| ((idx % width) as i64, (idx / width) as i64);
    let inside = |idx: usize, dir: usize| {
        let (dx, dy) = NEIGHBOURS[dir];
        step(idx % width, idx / width, dx, dy, width, height).filter(|&n| label[n] == id)
    };

    let mut contour = vec![at(start)];
    // clockwise from the west neighbour
    let first = match (0..8).find_map(|k| inside(start, (WEST + 8 - k) % 8)) {
        Some(first) => first,
        None => return contour,
    };

    let mut prev = first;
    let mut current = start;
    loop {
        let from = direction(current, prev, width);
        // counter-clockwise, beginning just past the previous pixel
        let next = match (1..=8).find_map(|k| inside(current, (from + k) % 8)) {
            Some(next) => next,
            None => break,
        };
        if next == start && current == first {
            break;
        }
        contour.push(at(next));
        prev = current;
        current = next;
    }
    contour
}

/// Shoelace area of the polygon through the given pixel centers
fn polygon_area(contour: &[(i64, i64)]) -> f64 {
    if contour.len() < 3 {
        return 0.0;
    }
    let twice: i64 = contour
        .iter()
        .zip(contour.iter().cycle().skip(1))
        .map(|(&(x0, y0), &(x1, y1))| x0 * y1 - x1 * y0)
        .sum();
    twice.abs() as f64 / 2.0
}

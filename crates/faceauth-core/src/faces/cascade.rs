//! Viola–Jones style cascade detector over Haar rectangle features.
//!
//! Models are JSON documents:
//!
//! ```json
//! {
//!   "window_width": 24,
//!   "window_height": 24,
//!   "features": [
//!     { "rects": [ { "x": 0, "y": 0, "width": 24, "height": 24, "weight": -1.0 },
//!                  { "x": 6, "y": 6, "width": 12, "height": 12, "weight": 4.0 } ] }
//!   ],
//!   "stages": [
//!     { "threshold": 0.0,
//!       "classifiers": [ { "feature": 0, "threshold": 0.1, "left": -1.0, "right": 1.0 } ] }
//!   ]
//! }
//! ```
//!
//! A feature value is the weighted rectangle sum divided by the window area. A
//! classifier votes `left` when that value is below `threshold` times the
//! standard deviation of the window, `right` otherwise. A window survives a
//! stage when the summed votes reach the stage threshold.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use faceauth_config::DetectionSettings;
use image::{imageops, GrayImage, RgbImage};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::errors::{AppError, AppResult};
use crate::faces::locator::{FaceBounds, FaceLocator};

const GROUP_EPS: f64 = 0.2;

#[derive(Debug, Clone, Deserialize)]
pub struct CascadeModel {
    pub window_width: u32,
    pub window_height: u32,
    pub features: Vec<HaarFeature>,
    pub stages: Vec<CascadeStage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HaarFeature {
    pub rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CascadeStage {
    pub threshold: f64,
    pub classifiers: Vec<StumpClassifier>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StumpClassifier {
    pub feature: usize,
    pub threshold: f64,
    pub left: f64,
    pub right: f64,
}

impl CascadeModel {
    pub fn load(path: &Path) -> AppResult<Self> {
        let file = File::open(path).map_err(|err| AppError::ModelLoad {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let model: CascadeModel =
            serde_json::from_reader(BufReader::new(file)).map_err(|err| AppError::ModelLoad {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        model.validate().map_err(|message| AppError::ModelLoad {
            path: path.to_path_buf(),
            message,
        })?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err("detection window must be non-empty".into());
        }
        if self.stages.is_empty() {
            return Err("cascade has no stages".into());
        }
        for (idx, feature) in self.features.iter().enumerate() {
            if feature.rects.is_empty() {
                return Err(format!("feature {idx} has no rectangles"));
            }
            for rect in &feature.rects {
                if rect.width == 0
                    || rect.height == 0
                    || rect.x + rect.width > self.window_width
                    || rect.y + rect.height > self.window_height
                {
                    return Err(format!("feature {idx} has a rectangle outside the window"));
                }
            }
        }
        for (stage_idx, stage) in self.stages.iter().enumerate() {
            if stage.classifiers.is_empty() {
                return Err(format!("stage {stage_idx} has no classifiers"));
            }
            if let Some(bad) = stage
                .classifiers
                .iter()
                .find(|clf| clf.feature >= self.features.len())
            {
                return Err(format!(
                    "stage {stage_idx} references unknown feature {}",
                    bad.feature
                ));
            }
        }
        Ok(())
    }
}

pub struct CascadeFaceLocator {
    model: CascadeModel,
    settings: DetectionSettings,
    source: Option<PathBuf>,
}

impl CascadeFaceLocator {
    pub fn new(model: CascadeModel, settings: DetectionSettings) -> AppResult<Self> {
        model.validate().map_err(AppError::InvalidConfig)?;
        if settings.scale_factor.is_nan() || settings.scale_factor <= 1.0 {
            return Err(AppError::InvalidConfig(format!(
                "scale factor must be greater than 1.0 (got {})",
                settings.scale_factor
            )));
        }
        Ok(Self {
            model,
            settings,
            source: None,
        })
    }

    pub fn from_path(path: &Path, settings: DetectionSettings) -> AppResult<Self> {
        debug!(path = %path.display(), "loading cascade model");
        let model = CascadeModel::load(path)?;
        let mut locator = Self::new(model, settings)?;
        locator.source = Some(path.to_path_buf());
        Ok(locator)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Raw window hits before grouping, in scan order.
    fn scan(&self, gray: &GrayImage) -> Vec<FaceBounds> {
        let integral = IntegralImage::new(gray);
        let (frame_w, frame_h) = gray.dimensions();
        let base_w = self.model.window_width as f64;
        let base_h = self.model.window_height as f64;

        let min_side = base_w.min(base_h);
        let mut scale = (self.settings.min_face_size as f64 / min_side).max(1.0);
        let mut hits = Vec::new();

        loop {
            let win_w = (base_w * scale).round() as u32;
            let win_h = (base_h * scale).round() as u32;
            if win_w > frame_w || win_h > frame_h {
                break;
            }
            if let Some(max) = self.settings.max_face_size {
                if win_w > max || win_h > max {
                    break;
                }
            }

            let features = self.scaled_features(scale, win_w, win_h);
            let step = (scale.round() as u32).max(1) as usize;
            let before = hits.len();
            for y in (0..=frame_h - win_h).step_by(step) {
                for x in (0..=frame_w - win_w).step_by(step) {
                    if self.accepts(&integral, &features, x, y, win_w, win_h) {
                        hits.push(FaceBounds::new(x, y, win_w, win_h));
                    }
                }
            }
            trace!(scale, win_w, win_h, hits = hits.len() - before, "cascade scale pass");

            scale *= self.settings.scale_factor;
        }

        hits
    }

    fn scaled_features(&self, scale: f64, win_w: u32, win_h: u32) -> Vec<Vec<WeightedRect>> {
        self.model
            .features
            .iter()
            .map(|feature| {
                let mut rects: Vec<WeightedRect> = feature
                    .rects
                    .iter()
                    .map(|rect| {
                        let x = ((rect.x as f64 * scale).round() as u32).min(win_w - 1);
                        let y = ((rect.y as f64 * scale).round() as u32).min(win_h - 1);
                        let width = ((rect.width as f64 * scale).round() as u32)
                            .max(1)
                            .min(win_w - x);
                        let height = ((rect.height as f64 * scale).round() as u32)
                            .max(1)
                            .min(win_h - y);
                        WeightedRect {
                            x,
                            y,
                            width,
                            height,
                            weight: rect.weight,
                        }
                    })
                    .collect();

                // Rounding skews the balance of zero-sum features; re-weight the
                // first rectangle so a flat window still scores zero.
                let base_balance: f64 = feature
                    .rects
                    .iter()
                    .map(|r| r.weight * (r.width * r.height) as f64)
                    .sum();
                if rects.len() > 1 && base_balance.abs() < 1e-9 {
                    let rest: f64 = rects[1..]
                        .iter()
                        .map(|r| r.weight * (r.width * r.height) as f64)
                        .sum();
                    let area0 = (rects[0].width * rects[0].height) as f64;
                    rects[0].weight = -rest / area0;
                }
                rects
            })
            .collect()
    }

    fn accepts(
        &self,
        integral: &IntegralImage,
        features: &[Vec<WeightedRect>],
        x: u32,
        y: u32,
        win_w: u32,
        win_h: u32,
    ) -> bool {
        let area = (win_w as f64) * (win_h as f64);
        let sum = integral.sum(x, y, win_w, win_h) as f64;
        let sq_sum = integral.sq_sum(x, y, win_w, win_h) as f64;
        let mean = sum / area;
        let variance = sq_sum / area - mean * mean;
        let std_dev = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        for stage in &self.model.stages {
            let mut total = 0.0;
            for clf in &stage.classifiers {
                let value: f64 = features[clf.feature]
                    .iter()
                    .map(|r| {
                        r.weight * integral.sum(x + r.x, y + r.y, r.width, r.height) as f64
                    })
                    .sum::<f64>()
                    / area;
                total += if value < clf.threshold * std_dev {
                    clf.left
                } else {
                    clf.right
                };
            }
            if total < stage.threshold {
                return false;
            }
        }
        true
    }
}

impl FaceLocator for CascadeFaceLocator {
    fn locate(&self, frame: &RgbImage) -> AppResult<Vec<FaceBounds>> {
        let gray = imageops::grayscale(frame);
        let hits = self.scan(&gray);
        let grouped = group_rectangles(&hits, self.settings.min_neighbors, GROUP_EPS);
        debug!(
            raw = hits.len(),
            grouped = grouped.len(),
            min_neighbors = self.settings.min_neighbors,
            scale_factor = self.settings.scale_factor,
            "cascade scan finished"
        );
        Ok(grouped)
    }

    fn name(&self) -> &'static str {
        "haar-cascade"
    }
}

struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sq: Vec<u64>,
}

impl IntegralImage {
    fn new(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        let stride = width as usize + 1;
        let mut sum = vec![0u64; stride * (height as usize + 1)];
        let mut sq = vec![0u64; stride * (height as usize + 1)];

        for y in 0..height as usize {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for x in 0..width as usize {
                let value = gray.get_pixel(x as u32, y as u32)[0] as u64;
                row_sum += value;
                row_sq += value * value;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sq[idx] = sq[idx - stride] + row_sq;
            }
        }

        Self { stride, sum, sq }
    }

    fn sum(&self, x: u32, y: u32, width: u32, height: u32) -> u64 {
        Self::rect(&self.sum, self.stride, x, y, width, height)
    }

    fn sq_sum(&self, x: u32, y: u32, width: u32, height: u32) -> u64 {
        Self::rect(&self.sq, self.stride, x, y, width, height)
    }

    fn rect(table: &[u64], stride: usize, x: u32, y: u32, width: u32, height: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + width as usize, y0 + height as usize);
        (table[y1 * stride + x1] + table[y0 * stride + x0])
            - (table[y0 * stride + x1] + table[y1 * stride + x0])
    }
}

fn similar(a: &FaceBounds, b: &FaceBounds, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

fn find_root(parents: &mut [usize], mut idx: usize) -> usize {
    while parents[idx] != idx {
        parents[idx] = parents[parents[idx]];
        idx = parents[idx];
    }
    idx
}

/// Clusters overlapping hits and keeps clusters with more than
/// `min_neighbors` members, averaged. Clusters sitting inside a stronger one
/// are dropped. With `min_neighbors == 0` the raw hits come back unchanged.
pub fn group_rectangles(hits: &[FaceBounds], min_neighbors: u32, eps: f64) -> Vec<FaceBounds> {
    if min_neighbors == 0 || hits.is_empty() {
        return hits.to_vec();
    }

    let mut parents: Vec<usize> = (0..hits.len()).collect();
    for i in 0..hits.len() {
        for j in (i + 1)..hits.len() {
            if similar(&hits[i], &hits[j], eps) {
                let root_i = find_root(&mut parents, i);
                let root_j = find_root(&mut parents, j);
                if root_i != root_j {
                    parents[root_j.max(root_i)] = root_i.min(root_j);
                }
            }
        }
    }

    // Class ids follow the first appearance of each cluster in scan order.
    let mut class_of_root = vec![usize::MAX; hits.len()];
    let mut sums: Vec<[f64; 4]> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    for (idx, hit) in hits.iter().enumerate() {
        let root = find_root(&mut parents, idx);
        if class_of_root[root] == usize::MAX {
            class_of_root[root] = sums.len();
            sums.push([0.0; 4]);
            counts.push(0);
        }
        let class = class_of_root[root];
        sums[class][0] += hit.x as f64;
        sums[class][1] += hit.y as f64;
        sums[class][2] += hit.width as f64;
        sums[class][3] += hit.height as f64;
        counts[class] += 1;
    }

    let averaged: Vec<FaceBounds> = sums
        .iter()
        .zip(counts.iter())
        .map(|(sum, &count)| {
            let n = count as f64;
            FaceBounds::new(
                (sum[0] / n).round() as u32,
                (sum[1] / n).round() as u32,
                (sum[2] / n).round() as u32,
                (sum[3] / n).round() as u32,
            )
        })
        .collect();

    let mut kept = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }
        let dx = (r1.width as f64 * eps).round();
        let dy = (r1.height as f64 * eps).round();
        let swallowed = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            j != i
                && n2 > min_neighbors
                && r1.x as f64 >= r2.x as f64 - dx
                && r1.y as f64 >= r2.y as f64 - dy
                && (r1.x + r1.width) as f64 <= (r2.x + r2.width) as f64 + dx
                && (r1.y + r1.height) as f64 <= (r2.y + r2.height) as f64 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !swallowed {
            kept.push(*r1);
        }
    }
    kept
}

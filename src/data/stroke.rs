//! Pen-offset sequences and their normalisation.
//!
//! A stroke sequence is a list of `(pen_lift, dx, dy)` offsets.  `pen_lift`
//! marks the last point of a pen-down segment.  Offsets are normalised per
//! axis with the training-set mean/std before they reach the model and are
//! denormalised again on the way out.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// One sampled pen movement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    /// `true` when the pen leaves the paper after this point.
    pub pen_lift: bool,
    pub dx: f32,
    pub dy: f32,
}

impl StrokePoint {
    pub fn new(pen_lift: bool, dx: f32, dy: f32) -> Self {
        Self { pen_lift, dx, dy }
    }

    /// The conventional first point of every sequence.
    pub fn origin() -> Self {
        Self::default()
    }

    /// `[pen_lift, dx, dy]` as floats.
    pub fn to_triple(&self) -> [f32; 3] {
        [if self.pen_lift { 1.0 } else { 0.0 }, self.dx, self.dy]
    }

    /// Parse a `[pen_lift, dx, dy]` triple.  Any pen value above 0.5 is a lift.
    pub fn from_triple(t: [f32; 3]) -> Self {
        Self::new(t[0] > 0.5, t[1], t[2])
    }

    /// Model input vector.
    pub fn to_input(&self) -> Array1<f32> {
        Array1::from_vec(self.to_triple().to_vec())
    }

    pub fn is_finite(&self) -> bool {
        self.dx.is_finite() && self.dy.is_finite()
    }
}

/// An ordered list of pen offsets.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StrokeSequence {
    pub points: Vec<StrokePoint>,
}

impl StrokeSequence {
    pub fn new(points: Vec<StrokePoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn push(&mut self, point: StrokePoint) {
        self.points.push(point);
    }

    pub fn last(&self) -> Option<&StrokePoint> {
        self.points.last()
    }

    pub fn to_triples(&self) -> Vec<[f32; 3]> {
        self.points.iter().map(|p| p.to_triple()).collect()
    }

    pub fn from_triples(triples: &[[f32; 3]]) -> Self {
        Self {
            points: triples.iter().map(|&t| StrokePoint::from_triple(t)).collect(),
        }
    }

    /// Serialise as a JSON array of `[pen_lift, dx, dy]` triples.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_triples())?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let triples: Vec<[f32; 3]> =
            serde_json::from_str(json).context("invalid stroke JSON")?;
        Ok(Self::from_triples(&triples))
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.to_triples())
            .with_context(|| format!("failed to write strokes to {}", path.display()))?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let triples: Vec<[f32; 3]> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("invalid stroke JSON in {}", path.display()))?;
        Ok(Self::from_triples(&triples))
    }

    /// Cumulative absolute coordinates split into pen-down polylines.
    ///
    /// A polyline ends at every point carrying `pen_lift`; that point is
    /// included in the polyline it closes.
    pub fn to_polylines(&self) -> Vec<Vec<(f32, f32)>> {
        let mut lines = Vec::new();
        let mut current = Vec::new();
        let (mut x, mut y) = (0.0f32, 0.0f32);
        for p in &self.points {
            x += p.dx;
            y += p.dy;
            current.push((x, y));
            if p.pen_lift {
                lines.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
        lines
    }

    /// Shift by one step: returns `(inputs, targets)` where `targets[t]` is
    /// the point that follows `inputs[t]`.
    pub fn shifted_pairs(&self) -> Option<(StrokeSequence, StrokeSequence)> {
        if self.points.len() < 2 {
            return None;
        }
        let n = self.points.len();
        Some((
            StrokeSequence::new(self.points[..n - 1].to_vec()),
            StrokeSequence::new(self.points[1..].to_vec()),
        ))
    }
}

/// Per-axis offset statistics of the training set.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    pub mean: [f32; 2],
    pub std: [f32; 2],
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::identity()
    }
}

impl Normalizer {
    pub fn identity() -> Self {
        Self {
            mean: [0.0, 0.0],
            std: [1.0, 1.0],
        }
    }

    /// Fit mean and standard deviation of `(dx, dy)` over every point.
    pub fn fit(sequences: &[StrokeSequence]) -> Result<Self> {
        let n: usize = sequences.iter().map(|s| s.len()).sum();
        if n == 0 {
            bail!("cannot fit normalizer on empty data");
        }
        let mut sum = [0.0f64; 2];
        for p in sequences.iter().flat_map(|s| &s.points) {
            sum[0] += p.dx as f64;
            sum[1] += p.dy as f64;
        }
        let mean = [sum[0] / n as f64, sum[1] / n as f64];
        let mut var = [0.0f64; 2];
        for p in sequences.iter().flat_map(|s| &s.points) {
            var[0] += (p.dx as f64 - mean[0]).powi(2);
            var[1] += (p.dy as f64 - mean[1]).powi(2);
        }
        let std = [
            (var[0] / n as f64).sqrt().max(1e-8),
            (var[1] / n as f64).sqrt().max(1e-8),
        ];
        Ok(Self {
            mean: [mean[0] as f32, mean[1] as f32],
            std: [std[0] as f32, std[1] as f32],
        })
    }

    pub fn normalize(&self, seq: &StrokeSequence) -> StrokeSequence {
        StrokeSequence::new(
            seq.points
                .iter()
                .map(|p| {
                    StrokePoint::new(
                        p.pen_lift,
                        (p.dx - self.mean[0]) / self.std[0],
                        (p.dy - self.mean[1]) / self.std[1],
                    )
                })
                .collect(),
        )
    }

    pub fn denormalize(&self, seq: &StrokeSequence) -> StrokeSequence {
        StrokeSequence::new(
            seq.points
                .iter()
                .map(|p| {
                    StrokePoint::new(
                        p.pen_lift,
                        p.dx * self.std[0] + self.mean[0],
                        p.dy * self.std[1] + self.mean[1],
                    )
                })
                .collect(),
        )
    }
}

//! YuNet detector post-processing.
//!
//! YuNet is anchor-free: for each stride (8, 16, 32) it predicts directly
//! from grid locations, emitting cls [1, H*W, 1], obj [1, H*W, 1],
//! bbox deltas [1, H*W, 4] and landmark deltas [1, H*W, 10]. Decoding maps
//! grid coordinates straight to canvas coordinates:
//!   cx = (grid_x + dx) * stride / input_size
//!   w  = dw * stride / input_size

use anyhow::{Context, Result};
use ndarray::Array2;

const STRIDES: [usize; 3] = [8, 16, 32];

/// Detection in canvas-normalized [0, 1] coordinates.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,...,x5,y5
}

/// Decode the detector's raw output tensors into scored detections.
///
/// Tensor order is committed by the model export:
/// cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16, bbox_32,
/// kps_8, kps_16, kps_32.
pub fn decode(
    outputs: &[(&[i64], &[f32])],
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>> {
    let counts = STRIDES.map(|s| (input_size / s) * (input_size / s));

    let cls = grid_maps(outputs, 0, 1, &counts).context("cls outputs")?;
    let obj = grid_maps(outputs, 3, 1, &counts).context("obj outputs")?;
    let bbox = grid_maps(outputs, 6, 4, &counts).context("bbox outputs")?;
    let kps = grid_maps(outputs, 9, 10, &counts).context("kps outputs")?;

    // Confidence is sigmoid of the combined cls/obj activation.
    let mut scores: Vec<Array2<f32>> = cls.iter().zip(obj.iter()).map(|(c, o)| c * o).collect();
    for map in scores.iter_mut() {
        map.mapv_inplace(sigmoid);
    }

    let mut detections = Vec::new();
    for (scale, &stride) in STRIDES.iter().enumerate() {
        let side = input_size / stride;
        let unit = stride as f32 / input_size as f32;
        for i in 0..side {
            for j in 0..side {
                let idx = i * side + j;
                let score = scores[scale][[idx, 0]];
                if score < score_threshold {
                    continue;
                }

                let cx = (j as f32 + bbox[scale][[idx, 0]]) * unit;
                let cy = (i as f32 + bbox[scale][[idx, 1]]) * unit;
                let w = bbox[scale][[idx, 2]] * unit;
                let h = bbox[scale][[idx, 3]] * unit;

                let mut landmarks = [0.0f32; 10];
                for k in 0..5 {
                    landmarks[k * 2] = (j as f32 + kps[scale][[idx, k * 2]]) * unit;
                    landmarks[k * 2 + 1] = (i as f32 + kps[scale][[idx, k * 2 + 1]]) * unit;
                }

                detections.push(RawDetection {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                    landmarks,
                });
            }
        }
    }

    Ok(detections)
}

/// Pull three per-stride maps of the given column width out of the output
/// list, shape-checked against the expected grid sizes.
fn grid_maps(
    outputs: &[(&[i64], &[f32])],
    start: usize,
    width: usize,
    counts: &[usize; 3],
) -> Result<Vec<Array2<f32>>> {
    let mut maps = Vec::with_capacity(3);
    for (offset, &count) in counts.iter().enumerate() {
        let idx = start + offset;
        let (shape, data) = outputs
            .get(idx)
            .ok_or_else(|| anyhow::anyhow!("missing output tensor {}", idx))?;
        if shape.len() != 3
            || shape[0] != 1
            || shape[1] as usize != count
            || shape[2] as usize != width
        {
            anyhow::bail!(
                "output {} has shape {:?}, expected [1, {}, {}]",
                idx,
                shape,
                count,
                width
            );
        }
        maps.push(Array2::from_shape_vec((count, width), data.to_vec())?);
    }
    Ok(maps)
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

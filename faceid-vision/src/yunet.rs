//! YuNet detector post-processing.
//!
//! The 2023mar export emits 12 heads, ordered
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16, bbox_32, kps_8, kps_16, kps_32`,
//! each shaped `[1, H*W, C]` for a square `input_size / stride` grid.
//!
//! Decoding is anchor-free, in canvas pixels:
//! cx = (col + dx) * stride, cy = (row + dy) * stride,
//! w = exp(dw) * stride, h = exp(dh) * stride,
//! score = sqrt(cls * obj).

use anyhow::{anyhow, bail, Result};
use ndarray::ArrayView2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// One raw output tensor copied out of an ort session.
#[derive(Debug, Clone)]
pub struct Head {
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h in canvas pixels
    pub score: f32,
    pub landmarks: [f32; 10],
}

fn head<'a>(heads: &'a [Head], index: usize, rows: usize, cols: usize) -> Result<ArrayView2<'a, f32>> {
    let head = heads
        .get(index)
        .ok_or_else(|| anyhow!("missing YuNet output {index}"))?;
    if head.shape != [1, rows as i64, cols as i64] {
        bail!(
            "unexpected shape {:?} for YuNet output {index}, expected [1, {rows}, {cols}]",
            head.shape
        );
    }
    Ok(ArrayView2::from_shape((rows, cols), head.data.as_slice())?)
}

pub fn decode(heads: &[Head], input_size: usize, score_threshold: f32) -> Result<Vec<RawDetection>> {
    if heads.len() != 4 * STRIDES.len() {
        bail!("expected {} YuNet outputs, got {}", 4 * STRIDES.len(), heads.len());
    }

    let mut detections = Vec::new();
    for (level, &stride) in STRIDES.iter().enumerate() {
        let grid = input_size / stride;
        let cells = grid * grid;

        let cls = head(heads, level, cells, 1)?;
        let obj = head(heads, level + 3, cells, 1)?;
        let bbox = head(heads, level + 6, cells, 4)?;
        let kps = head(heads, level + 9, cells, 10)?;

        let step = stride as f32;
        for cell in 0..cells {
            let score = (cls[[cell, 0]] * obj[[cell, 0]]).clamp(0.0, 1.0).sqrt();
            if score < score_threshold {
                continue;
            }

            let col = (cell % grid) as f32;
            let row = (cell / grid) as f32;

            let cx = (col + bbox[[cell, 0]]) * step;
            let cy = (row + bbox[[cell, 1]]) * step;
            let w = bbox[[cell, 2]].exp() * step;
            let h = bbox[[cell, 3]].exp() * step;

            let mut landmarks = [0.0f32; 10];
            for point in 0..5 {
                landmarks[point * 2] = (col + kps[[cell, point * 2]]) * step;
                landmarks[point * 2 + 1] = (row + kps[[cell, point * 2 + 1]]) * step;
            }

            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }

    log::debug!("yunet decoded {} candidate(s)", detections.len());
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_heads(input_size: usize) -> Vec<Head> {
        let widths = [1usize, 1, 4, 10];
        let mut heads = Vec::new();
        for cols in widths {
            for stride in STRIDES {
                let cells = (input_size / stride).pow(2);
                heads.push(Head {
                    shape: vec![1, cells as i64, cols as i64],
                    data: vec![0.0; cells * cols],
                });
            }
        }
        heads
    }

    #[test]
    fn decodes_single_cell_on_coarsest_grid() {
        let input_size = 640;
        let mut heads = empty_heads(input_size);
        let grid = input_size / 32;
        let cell = 10 * grid + 10;

        heads[2].data[cell] = 0.81; // cls_32
        heads[5].data[cell] = 1.0; // obj_32
        let bbox = &mut heads[8].data;
        bbox[cell * 4] = 0.5;
        bbox[cell * 4 + 1] = 0.25;
        bbox[cell * 4 + 2] = 4.0f32.ln();
        bbox[cell * 4 + 3] = 4.0f32.ln();

        let detections = decode(&heads, input_size, 0.5).unwrap();
        assert_eq!(detections.len(), 1);
        let det = &detections[0];

        // centre (10.5 * 32, 10.25 * 32) = (336, 328), size 128
        assert!((det.score - 0.9).abs() < 1e-5);
        assert!((det.bbox[0] - 272.0).abs() < 1e-3);
        assert!((det.bbox[1] - 264.0).abs() < 1e-3);
        assert!((det.bbox[2] - 128.0).abs() < 1e-3);
        assert!((det.bbox[3] - 128.0).abs() < 1e-3);
        assert!((det.landmarks[0] - 320.0).abs() < 1e-3);
        assert!((det.landmarks[1] - 320.0).abs() < 1e-3);
    }

    #[test]
    fn rejects_wrong_head_shape() {
        let mut heads = empty_heads(640);
        heads[0].shape = vec![1, 10, 1];
        assert!(decode(&heads, 640, 0.5).is_err());
    }

    #[test]
    fn rejects_missing_heads() {
        let heads = empty_heads(640);
        assert!(decode(&heads[..11], 640, 0.5).is_err());
    }
}

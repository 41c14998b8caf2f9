//! YuNet face detector on ONNX Runtime.
//!
//! The 2023mar model takes a `[1, 3, 640, 640]` BGR tensor and emits twelve
//! outputs, four per stride (8, 16, 32) in the order
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, .., kps_32`.
//! Each row belongs to one grid cell; decoding is anchor-free:
//!
//! ```text
//! cx = (col + dx) * stride      w = exp(dw) * stride
//! cy = (row + dy) * stride      h = exp(dh) * stride
//! score = sqrt(cls * obj)
//! ```

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{Array2, Array4};
use ort::{session::Session, value::Value};
use std::path::PathBuf;

use crate::detector::{DetectorOptions, EngineFactory, Face, FaceEngine, PerformanceMode};
use crate::tracking::iou;

const STRIDES: [usize; 3] = [8, 16, 32];
pub const INPUT_SIZE: u32 = 640;

/// Smallest face kept in fast mode, as a share of the frame's shorter side.
const FAST_MIN_FACE: f32 = 0.1;

/// Outputs of one stride, one row per grid cell.
#[derive(Debug)]
pub struct StrideHead {
    pub stride: usize,
    pub cls: Array2<f32>,
    pub obj: Array2<f32>,
    pub bbox: Array2<f32>,
    pub kps: Array2<f32>,
}

/// Face in model-input pixel coordinates.
#[derive(Debug, Clone)]
pub struct RawFace {
    pub bbox: [f32; 4],
    pub score: f32,
    pub landmarks: [f32; 10],
}

fn take_output(
    outputs: &[(Vec<i64>, Vec<f32>)],
    index: usize,
    rows: usize,
    cols: usize,
) -> Result<Array2<f32>> {
    let (shape, data) = outputs
        .get(index)
        .with_context(|| format!("missing output {}", index))?;
    let expected = [1, rows as i64, cols as i64];
    if shape.as_slice() != expected {
        anyhow::bail!(
            "output {} has shape {:?}, expected {:?}",
            index,
            shape,
            expected
        );
    }
    Ok(Array2::from_shape_vec((rows, cols), data.clone())?)
}

/// Split the twelve raw outputs into per-stride heads.
pub fn split_heads(outputs: &[(Vec<i64>, Vec<f32>)], input_size: usize) -> Result<Vec<StrideHead>> {
    STRIDES
        .iter()
        .enumerate()
        .map(|(k, &stride)| {
            let side = input_size / stride;
            let rows = side * side;
            Ok(StrideHead {
                stride,
                cls: take_output(outputs, k, rows, 1)?,
                obj: take_output(outputs, k + 3, rows, 1)?,
                bbox: take_output(outputs, k + 6, rows, 4)?,
                kps: take_output(outputs, k + 9, rows, 10)?,
            })
        })
        .collect()
}

pub fn decode(heads: &[StrideHead], input_size: usize, score_threshold: f32) -> Vec<RawFace> {
    let mut faces = Vec::new();
    for head in heads {
        let side = input_size / head.stride;
        let stride = head.stride as f32;
        for row in 0..side {
            for col in 0..side {
                let idx = row * side + col;
                let cls = head.cls[[idx, 0]].clamp(0.0, 1.0);
                let obj = head.obj[[idx, 0]].clamp(0.0, 1.0);
                let score = (cls * obj).sqrt();
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + head.bbox[[idx, 0]]) * stride;
                let cy = (row as f32 + head.bbox[[idx, 1]]) * stride;
                let w = head.bbox[[idx, 2]].exp() * stride;
                let h = head.bbox[[idx, 3]].exp() * stride;

                let mut landmarks = [0.0f32; 10];
                for p in 0..5 {
                    landmarks[p * 2] = (col as f32 + head.kps[[idx, p * 2]]) * stride;
                    landmarks[p * 2 + 1] = (row as f32 + head.kps[[idx, p * 2 + 1]]) * stride;
                }

                faces.push(RawFace {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                    landmarks,
                });
            }
        }
    }
    faces
}

/// Non-maximum suppression, highest score first.
pub fn nms(mut faces: Vec<RawFace>, iou_threshold: f32) -> Vec<RawFace> {
    faces.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<RawFace> = Vec::with_capacity(faces.len());
    for face in faces {
        if keep.iter().all(|k| iou(&k.bbox, &face.bbox) <= iou_threshold) {
            keep.push(face);
        }
    }
    keep
}

/// Square letterbox placement of a frame inside the model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Letterbox {
    pub fn fit(width: u32, height: u32, target: u32) -> Self {
        let scale = target as f32 / width.max(height) as f32;
        let new_w = (width as f32 * scale) as u32;
        let new_h = (height as f32 * scale) as u32;
        Self {
            scale,
            offset_x: ((target - new_w) / 2) as f32,
            offset_y: ((target - new_h) / 2) as f32,
        }
    }

    pub fn unmap_x(&self, x: f32) -> f32 {
        (x - self.offset_x) / self.scale
    }

    pub fn unmap_y(&self, y: f32) -> f32 {
        (y - self.offset_y) / self.scale
    }

    pub fn unmap_face(&self, raw: &RawFace) -> ([f32; 4], [f32; 10]) {
        let bbox = [
            self.unmap_x(raw.bbox[0]),
            self.unmap_y(raw.bbox[1]),
            raw.bbox[2] / self.scale,
            raw.bbox[3] / self.scale,
        ];
        let mut landmarks = [0.0f32; 10];
        for p in 0..5 {
            landmarks[p * 2] = self.unmap_x(raw.landmarks[p * 2]);
            landmarks[p * 2 + 1] = self.unmap_y(raw.landmarks[p * 2 + 1]);
        }
        (bbox, landmarks)
    }
}

/// Letterbox `img` into a square BGR planar tensor.
pub fn preprocess(img: &RgbImage, filter: FilterType) -> Result<(Array4<f32>, Letterbox)> {
    let (width, height) = img.dimensions();
    let letterbox = Letterbox::fit(width, height, INPUT_SIZE);
    let new_w = ((width as f32 * letterbox.scale) as u32).max(1);
    let new_h = ((height as f32 * letterbox.scale) as u32).max(1);
    let resized = image::imageops::resize(img, new_w, new_h, filter);

    let mut canvas = RgbImage::new(INPUT_SIZE, INPUT_SIZE);
    image::imageops::overlay(
        &mut canvas,
        &resized,
        letterbox.offset_x as i64,
        letterbox.offset_y as i64,
    );

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (i, px) in canvas.pixels().enumerate() {
        data[i] = px[2] as f32;
        data[plane + i] = px[1] as f32;
        data[2 * plane + i] = px[0] as f32;
    }
    let side = INPUT_SIZE as usize;
    let tensor = Array4::from_shape_vec((1, 3, side, side), data)?;
    Ok((tensor, letterbox))
}

/// Map decoded faces back onto the frame and apply the performance mode.
pub fn finish(
    raw: Vec<RawFace>,
    letterbox: &Letterbox,
    frame_size: (u32, u32),
    mode: PerformanceMode,
) -> Vec<Face> {
    let min_side = match mode {
        PerformanceMode::Fast => frame_size.0.min(frame_size.1) as f32 * FAST_MIN_FACE,
        PerformanceMode::Accurate => 0.0,
    };
    raw.iter()
        .map(|r| letterbox.unmap_face(r))
        .zip(raw.iter().map(|r| r.score))
        .filter(|((bbox, _), _)| bbox[2].min(bbox[3]) >= min_side)
        .map(|((bbox, landmarks), score)| Face {
            bbox,
            score,
            landmarks: (mode == PerformanceMode::Accurate).then_some(landmarks),
            tracking_id: None,
        })
        .collect()
}

pub struct YuNetEngine {
    session: Option<Session>,
    options: DetectorOptions,
}

impl YuNetEngine {
    pub fn new(session: Session, options: DetectorOptions) -> Self {
        Self {
            session: Some(session),
            options,
        }
    }
}

impl FaceEngine for YuNetEngine {
    fn process(&mut self, image: &RgbImage) -> Result<Vec<Face>> {
        let session = self.session.as_mut().context("session closed")?;
        let filter = match self.options.performance_mode {
            PerformanceMode::Fast => FilterType::Nearest,
            PerformanceMode::Accurate => FilterType::Triangle,
        };
        let (tensor, letterbox) = preprocess(image, filter)?;
        let outputs = session.run(ort::inputs![Value::from_array(tensor)?])?;

        let mut raw_outputs: Vec<(Vec<i64>, Vec<f32>)> = Vec::with_capacity(12);
        for (_name, output) in outputs.iter() {
            let (shape, data) = output.try_extract_tensor::<f32>()?;
            raw_outputs.push((shape.iter().copied().collect(), data.to_vec()));
        }

        let heads = split_heads(&raw_outputs, INPUT_SIZE as usize)?;
        let raw = decode(&heads, INPUT_SIZE as usize, self.options.score_threshold);
        let raw = nms(raw, self.options.nms_threshold);
        Ok(finish(
            raw,
            &letterbox,
            image.dimensions(),
            self.options.performance_mode,
        ))
    }

    fn close(&mut self) {
        if self.session.take().is_some() {
            log::debug!("yunet session closed");
        }
    }
}

/// Loads the YuNet model from disk for every new binding.
#[derive(Debug, Clone)]
pub struct YuNetFactory {
    pub model: PathBuf,
}

impl EngineFactory for YuNetFactory {
    type Engine = YuNetEngine;

    fn create(&self, options: &DetectorOptions) -> Result<YuNetEngine> {
        let session = crate::model::detector_session(&self.model)?;
        Ok(YuNetEngine::new(session, *options))
    }
}

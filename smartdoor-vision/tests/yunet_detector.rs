use anyhow::Result;
use image::RgbImage;
use smartdoor_vision::{
    DetectError, DetectorAdapter, DetectorOptions, EngineFactory, Frame, FrameLedger,
    PerformanceMode, Rotation, YuNetFactory,
};
use std::path::PathBuf;

fn model_path() -> Option<PathBuf> {
    let path = std::env::var_os("SMARTDOOR_MODEL")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("models/face_detection_yunet_2023mar.onnx"));
    if path.exists() {
        Some(path)
    } else {
        println!("model not found at {}, skipping", path.display());
        None
    }
}

#[test]
fn test_missing_model_is_an_error() {
    let factory = YuNetFactory {
        model: PathBuf::from("does/not/exist.onnx"),
    };
    assert!(factory.create(&DetectorOptions::default()).is_err());
}

#[test]
fn test_blank_image_has_no_faces() -> Result<()> {
    env_logger::try_init().ok();
    let Some(model) = model_path() else {
        return Ok(());
    };

    let ledger = FrameLedger::default();
    for mode in [PerformanceMode::Fast, PerformanceMode::Accurate] {
        let options = DetectorOptions {
            performance_mode: mode,
            ..Default::default()
        };
        let mut detector = DetectorAdapter::build(&YuNetFactory { model: model.clone() }, options)?;

        let frame = Frame::new(0, Some(RgbImage::new(640, 480)), Rotation::Deg0, ledger.issue());
        let faces = detector.analyze(frame).expect("frame has an image")?;
        println!("{:?}: {} face(s)", mode, faces.len());
        assert!(faces.is_empty());

        detector.dispose();
        let frame = Frame::new(1, Some(RgbImage::new(320, 240)), Rotation::Deg90, ledger.issue());
        assert!(matches!(
            detector.analyze(frame),
            Some(Err(DetectError::Disposed))
        ));
    }
    assert_eq!(ledger.outstanding(), 0);
    Ok(())
}

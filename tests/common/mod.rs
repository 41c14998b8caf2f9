#![allow(dead_code)]

use anyhow::Result;
use image::RgbImage;
use smartdoor::{
    AnalysisExecutor, BinderPhase, StatusCell, ViewBinder, Waker,
};
use smartdoor_vision::{
    CameraProvider, DetectorOptions, EngineFactory, Face, FaceEngine, Frame, FrameLedger,
    FrameStream, LensFacing, Rotation,
};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// In-memory camera. All streams share one ledger.
#[derive(Clone, Default)]
pub struct FakeProvider {
    pub ledger: FrameLedger,
    pub opens: Arc<Mutex<Vec<LensFacing>>>,
    pub open_delay: Duration,
    pub frame_interval: Duration,
    pub broken: Option<LensFacing>,
    pub fail_after: Option<u64>,
    pub blank_frames: bool,
    /// Refuse a second open of a facing while a stream for it is alive.
    pub exclusive: bool,
    pub owners: Arc<Mutex<HashSet<LensFacing>>>,
}

impl FakeProvider {
    pub fn opened(&self) -> Vec<LensFacing> {
        self.opens.lock().unwrap().clone()
    }
}

/// Holds a facing for as long as its stream lives.
pub struct Ownership {
    owners: Arc<Mutex<HashSet<LensFacing>>>,
    facing: LensFacing,
}

impl Drop for Ownership {
    fn drop(&mut self) {
        self.owners.lock().unwrap().remove(&self.facing);
    }
}

pub struct FakeStream {
    _owner: Option<Ownership>,
    ledger: FrameLedger,
    sequence: u64,
    interval: Duration,
    fail_after: Option<u64>,
    blank: bool,
}

impl CameraProvider for FakeProvider {
    type Stream = FakeStream;

    fn open(&self, facing: LensFacing) -> Result<FakeStream> {
        let owner = if self.exclusive {
            if !self.owners.lock().unwrap().insert(facing) {
                anyhow::bail!("{} camera busy", facing);
            }
            Some(Ownership {
                owners: self.owners.clone(),
                facing,
            })
        } else {
            None
        };
        thread::sleep(self.open_delay);
        self.opens.lock().unwrap().push(facing);
        if self.broken == Some(facing) {
            anyhow::bail!("{} camera unplugged", facing);
        }
        Ok(FakeStream {
            _owner: owner,
            ledger: self.ledger.clone(),
            sequence: 0,
            interval: self.frame_interval,
            fail_after: self.fail_after,
            blank: self.blank_frames,
        })
    }
}

impl FrameStream for FakeStream {
    fn next_frame(&mut self) -> Result<Frame> {
        if self.interval.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(self.interval);
        }
        if self.fail_after.is_some_and(|n| self.sequence >= n) {
            anyhow::bail!("device gone");
        }
        let image = (!self.blank).then(|| RgbImage::new(16, 12));
        let frame = Frame::new(self.sequence, image, Rotation::Deg0, self.ledger.issue());
        self.sequence += 1;
        Ok(frame)
    }

    fn ledger(&self) -> &FrameLedger {
        &self.ledger
    }
}

/// What the fake engine answers for one call.
#[derive(Debug, Clone, Copy)]
pub enum Answer {
    Faces(usize),
    Fail,
}

/// Engine factory with a shared script and lifecycle counters.
#[derive(Clone, Default)]
pub struct FakeFactory {
    pub script: Arc<Mutex<VecDeque<Answer>>>,
    pub fallback_faces: Arc<AtomicUsize>,
    /// Once the script runs out, fail every call.
    pub fallback_fail: Arc<AtomicBool>,
    pub calls: Arc<AtomicUsize>,
    pub created: Arc<AtomicUsize>,
    pub alive: Arc<AtomicUsize>,
    pub max_alive: Arc<AtomicUsize>,
}

impl FakeFactory {
    pub fn scripted(answers: &[Answer]) -> Self {
        let factory = Self::default();
        factory.script.lock().unwrap().extend(answers.iter().copied());
        factory
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn alive(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }
}

pub struct FakeEngine {
    factory: FakeFactory,
}

impl EngineFactory for FakeFactory {
    type Engine = FakeEngine;

    fn create(&self, _options: &DetectorOptions) -> Result<FakeEngine> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let alive = self.alive.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_alive.fetch_max(alive, Ordering::SeqCst);
        Ok(FakeEngine {
            factory: self.clone(),
        })
    }
}

impl FaceEngine for FakeEngine {
    fn process(&mut self, image: &RgbImage) -> Result<Vec<Face>> {
        self.factory.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.factory.script.lock().unwrap().pop_front();
        let count = match answer {
            Some(Answer::Fail) => anyhow::bail!("inference failed"),
            Some(Answer::Faces(n)) => n,
            None if self.factory.fallback_fail.load(Ordering::SeqCst) => {
                anyhow::bail!("inference failed")
            }
            None => self.factory.fallback_faces.load(Ordering::SeqCst),
        };
        let (w, h) = image.dimensions();
        Ok((0..count)
            .map(|i| Face {
                bbox: [i as f32, 0.0, w as f32 / 2.0, h as f32 / 2.0],
                score: 0.9,
                landmarks: None,
                tracking_id: None,
            })
            .collect())
    }

    fn close(&mut self) {
        self.factory.alive.fetch_sub(1, Ordering::SeqCst);
    }
}

pub type FakeBinder = ViewBinder<FakeProvider, FakeFactory>;

pub fn noop_waker() -> Waker {
    Arc::new(|| {})
}

pub fn binder(
    provider: &FakeProvider,
    factory: &FakeFactory,
    executor: &AnalysisExecutor,
) -> FakeBinder {
    ViewBinder::new(
        provider.clone(),
        factory.clone(),
        DetectorOptions::default(),
        executor.handle(),
        LensFacing::Front,
        noop_waker(),
    )
}

/// Pump until `done` holds, panicking after a few seconds.
pub fn pump_until(
    binder: &mut FakeBinder,
    status: &mut StatusCell,
    mut done: impl FnMut(&FakeBinder, &StatusCell) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        binder.pump(status);
        if done(binder, status) {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for binder");
        thread::sleep(Duration::from_millis(2));
    }
}

pub fn wait_bound(binder: &mut FakeBinder, status: &mut StatusCell) {
    pump_until(binder, status, |b, _| b.phase() == BinderPhase::Bound);
}

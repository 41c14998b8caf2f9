//! Camera + detector lifecycle tied to the presentation surface.
//!
//! State machine: `Unbound -> Binding -> Bound -> Unbound`. Opening the
//! camera runs on a short-lived provider thread; the result comes back to
//! the UI thread through [`ViewBinder::pump`]. Every binding gets a fresh
//! generation number, and anything arriving from an older generation is
//! dropped on the floor.
//!
//! Unbinding stops capture, releases the pending frame and disposes the
//! detector before any new binding starts, so at most one detector exists.
//! Abandoning a pending binding waits for its open to return and closes the
//! stream it produced, so a device is never opened twice at once.

use anyhow::Result;
use smartdoor_vision::{
    CameraProvider, DetectError, DetectorAdapter, DetectorOptions, EngineFactory, FaceEngine,
    FaceSet, Frame, FrameStream, LatestSlot, LensFacing, PreviewImage,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::DoorError;
use crate::executor::ExecutorHandle;
use crate::permission::Grant;
use crate::status::{presence_policy, StatusCell};

/// Consecutive capture errors tolerated before the stream is given up.
const MAX_CAPTURE_FAILURES: u32 = 5;
const CAPTURE_RETRY: Duration = Duration::from_millis(50);

/// Called from background threads when the UI should run `pump`.
pub type Waker = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinderPhase {
    Unbound,
    Binding,
    Bound,
}

struct Ready<S> {
    generation: u64,
    facing: LensFacing,
    result: Result<S>,
}

enum BinderEvent {
    Detection {
        generation: u64,
        outcome: Result<FaceSet, DetectError>,
    },
    StreamEnded {
        generation: u64,
        facing: LensFacing,
        error: anyhow::Error,
    },
}

/// State shared by the capture thread and the analysis worker.
struct Analysis<E: FaceEngine> {
    generation: u64,
    frames: LatestSlot<Frame>,
    in_flight: AtomicBool,
    detector: Mutex<DetectorAdapter<E>>,
    events: mpsc::Sender<BinderEvent>,
    waker: Waker,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl<E: FaceEngine> Analysis<E> {
    fn emit(&self, event: BinderEvent) {
        if self.events.send(event).is_ok() {
            (self.waker)();
        }
    }

    /// Queue a drain on the executor unless one is already running.
    fn schedule(self: &Arc<Self>, executor: &ExecutorHandle) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let this = self.clone();
        if let Err(e) = executor.submit(move || this.drain()) {
            log::debug!("{:#}", e);
            self.in_flight.store(false, Ordering::Release);
            drop(self.frames.take());
        }
    }

    /// Analyze frames one at a time until the slot stays empty.
    fn drain(&self) {
        loop {
            {
                // held across take so a release never races a frame in hand
                let mut detector = lock(&self.detector);
                while let Some(frame) = self.frames.take() {
                    if let Some(outcome) = detector.analyze(frame) {
                        self.emit(BinderEvent::Detection {
                            generation: self.generation,
                            outcome,
                        });
                    }
                }
            }
            self.in_flight.store(false, Ordering::Release);
            // a frame may have landed between the last take and the store
            if self.frames.is_empty()
                || self
                    .in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
            {
                return;
            }
        }
    }
}

fn capture_loop<S: FrameStream, E: FaceEngine>(
    mut stream: S,
    facing: LensFacing,
    analysis: Arc<Analysis<E>>,
    executor: ExecutorHandle,
    preview: Arc<LatestSlot<PreviewImage>>,
    stop: Arc<AtomicBool>,
) {
    let mut failures = 0;
    while !stop.load(Ordering::Acquire) {
        match stream.next_frame() {
            Ok(frame) => {
                failures = 0;
                if let Some(image) = frame.preview() {
                    preview.put(image);
                }
                drop(analysis.frames.put(frame));
                analysis.schedule(&executor);
                (analysis.waker)();
            }
            Err(e) => {
                failures += 1;
                log::warn!(
                    "{} camera capture failed ({}/{}): {:#}",
                    facing,
                    failures,
                    MAX_CAPTURE_FAILURES,
                    e
                );
                if failures >= MAX_CAPTURE_FAILURES {
                    analysis.emit(BinderEvent::StreamEnded {
                        generation: analysis.generation,
                        facing,
                        error: e,
                    });
                    return;
                }
                thread::sleep(CAPTURE_RETRY);
            }
        }
    }
    log::debug!(
        "{} capture stopped after {} dropped frame(s)",
        facing,
        analysis.frames.dropped()
    );
}

struct ActiveBinding<E: FaceEngine> {
    generation: u64,
    facing: LensFacing,
    stop: Arc<AtomicBool>,
    capture: Option<JoinHandle<()>>,
    analysis: Arc<Analysis<E>>,
}

impl<E: FaceEngine> ActiveBinding<E> {
    fn release(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(capture) = self.capture.take() {
            if capture.join().is_err() {
                log::error!("{} capture thread panicked", self.facing);
            }
        }
        drop(self.analysis.frames.take());
        lock(&self.analysis.detector).dispose();
        log::info!(
            "released {} camera (generation {})",
            self.facing,
            self.generation
        );
    }
}

enum State<E: FaceEngine> {
    Unbound,
    Binding {
        generation: u64,
        provider: Option<JoinHandle<()>>,
    },
    Bound(ActiveBinding<E>),
}

fn join_provider(handle: JoinHandle<()>, generation: u64) {
    if handle.join().is_err() {
        log::error!("camera provider thread {} panicked", generation);
    }
}

pub struct ViewBinder<P: CameraProvider, F: EngineFactory> {
    provider: Arc<P>,
    factory: F,
    options: DetectorOptions,
    executor: ExecutorHandle,
    waker: Waker,
    facing: LensFacing,
    granted: bool,
    surface_ready: bool,
    generation: u64,
    state: State<F::Engine>,
    preview: Arc<LatestSlot<PreviewImage>>,
    ready_tx: mpsc::Sender<Ready<P::Stream>>,
    ready_rx: mpsc::Receiver<Ready<P::Stream>>,
    events_tx: mpsc::Sender<BinderEvent>,
    events_rx: mpsc::Receiver<BinderEvent>,
}

impl<P: CameraProvider, F: EngineFactory> ViewBinder<P, F> {
    pub fn new(
        provider: P,
        factory: F,
        options: DetectorOptions,
        executor: ExecutorHandle,
        facing: LensFacing,
        waker: Waker,
    ) -> Self {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            provider: Arc::new(provider),
            factory,
            options,
            executor,
            waker,
            facing,
            granted: false,
            surface_ready: false,
            generation: 0,
            state: State::Unbound,
            preview: Arc::new(LatestSlot::new()),
            ready_tx,
            ready_rx,
            events_tx,
            events_rx,
        }
    }

    pub fn phase(&self) -> BinderPhase {
        match self.state {
            State::Unbound => BinderPhase::Unbound,
            State::Binding { .. } => BinderPhase::Binding,
            State::Bound(_) => BinderPhase::Bound,
        }
    }

    pub fn facing(&self) -> LensFacing {
        self.facing
    }

    /// Generation of the most recent binding attempt, 0 if none yet.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Most recent camera image for the preview.
    pub fn preview(&self) -> Option<PreviewImage> {
        self.preview.peek()
    }

    /// The render target exists. Binds if the capability was granted.
    pub fn surface_ready(&mut self, grant: Grant) {
        self.granted = grant == Grant::Granted;
        if !self.granted {
            log::warn!("{}; camera stays off", DoorError::PermissionDenied);
            return;
        }
        if self.surface_ready {
            return;
        }
        self.surface_ready = true;
        if matches!(self.state, State::Unbound) {
            self.start_binding();
        }
    }

    pub fn surface_teardown(&mut self) {
        self.surface_ready = false;
        self.unbind();
    }

    /// Switch cameras. The old binding is gone before the new one starts.
    pub fn select(&mut self, facing: LensFacing) {
        if facing == self.facing {
            return;
        }
        log::info!("switching camera {} -> {}", self.facing, facing);
        self.facing = facing;
        if self.granted && self.surface_ready {
            self.unbind();
            self.start_binding();
        }
    }

    pub fn toggle(&mut self) {
        self.select(self.facing.toggled());
    }

    /// Apply everything the background threads produced. Returns the
    /// number of detection results folded into `status`.
    pub fn pump(&mut self, status: &mut StatusCell) -> usize {
        while let Ok(ready) = self.ready_rx.try_recv() {
            self.on_ready(ready);
        }

        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            let live = self.bound_generation();
            match event {
                BinderEvent::Detection {
                    generation,
                    outcome,
                } if Some(generation) == live => {
                    status.set(presence_policy(outcome));
                    applied += 1;
                }
                BinderEvent::Detection { generation, .. } => {
                    log::debug!("dropping detection from stale binding {}", generation);
                }
                BinderEvent::StreamEnded {
                    generation,
                    facing,
                    error,
                } if Some(generation) == live => {
                    log::error!("{}", DoorError::BindingFailure { facing, source: error });
                    self.unbind();
                }
                BinderEvent::StreamEnded { .. } => {}
            }
        }
        applied
    }

    fn bound_generation(&self) -> Option<u64> {
        match &self.state {
            State::Bound(binding) => Some(binding.generation),
            _ => None,
        }
    }

    fn start_binding(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let facing = self.facing;
        let provider = self.provider.clone();
        let tx = self.ready_tx.clone();
        let waker = self.waker.clone();

        log::info!("binding {} camera (generation {})", facing, generation);
        let spawned = thread::Builder::new()
            .name("camera-provider".into())
            .spawn(move || {
                let result = provider.open(facing);
                if tx
                    .send(Ready {
                        generation,
                        facing,
                        result,
                    })
                    .is_ok()
                {
                    waker();
                }
            });
        match spawned {
            Ok(handle) => {
                self.state = State::Binding {
                    generation,
                    provider: Some(handle),
                }
            }
            Err(e) => {
                log::error!(
                    "{}",
                    DoorError::BindingFailure {
                        facing,
                        source: e.into()
                    }
                );
                self.state = State::Unbound;
            }
        }
    }

    fn on_ready(&mut self, ready: Ready<P::Stream>) {
        let provider = match &mut self.state {
            State::Binding {
                generation,
                provider,
            } if *generation == ready.generation => provider.take(),
            _ => {
                if ready.result.is_ok() {
                    log::debug!("closing stale camera stream {}", ready.generation);
                }
                return;
            }
        };
        if let Some(handle) = provider {
            join_provider(handle, ready.generation);
        }

        let Ready {
            generation,
            facing,
            result,
        } = ready;
        let bound = result.and_then(|stream| self.connect(generation, facing, stream));
        match bound {
            Ok(binding) => {
                log::info!("{} camera bound (generation {})", facing, binding.generation);
                self.state = State::Bound(binding);
            }
            Err(source) => {
                log::error!("{}", DoorError::BindingFailure { facing, source });
                self.state = State::Unbound;
            }
        }
    }

    fn connect(
        &self,
        generation: u64,
        facing: LensFacing,
        stream: P::Stream,
    ) -> Result<ActiveBinding<F::Engine>> {
        let detector = DetectorAdapter::build(&self.factory, self.options)?;
        let analysis = Arc::new(Analysis {
            generation,
            frames: LatestSlot::new(),
            in_flight: AtomicBool::new(false),
            detector: Mutex::new(detector),
            events: self.events_tx.clone(),
            waker: self.waker.clone(),
        });
        let stop = Arc::new(AtomicBool::new(false));

        let capture = {
            let analysis = analysis.clone();
            let executor = self.executor.clone();
            let preview = self.preview.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("capture-{}", facing))
                .spawn(move || capture_loop(stream, facing, analysis, executor, preview, stop))?
        };

        Ok(ActiveBinding {
            generation,
            facing,
            stop,
            capture: Some(capture),
            analysis,
        })
    }

    fn unbind(&mut self) {
        match std::mem::replace(&mut self.state, State::Unbound) {
            State::Bound(binding) => binding.release(),
            State::Binding {
                generation,
                provider,
            } => {
                log::debug!("abandoning pending binding {}", generation);
                // the device stays claimed until the open returns
                if let Some(handle) = provider {
                    join_provider(handle, generation);
                }
                while let Ok(stale) = self.ready_rx.try_recv() {
                    log::debug!(
                        "closing abandoned {} camera stream {}",
                        stale.facing,
                        stale.generation
                    );
                }
            }
            State::Unbound => {}
        }
        drop(self.preview.take());
    }
}

impl<P: CameraProvider, F: EngineFactory> Drop for ViewBinder<P, F> {
    fn drop(&mut self) {
        self.unbind();
    }
}

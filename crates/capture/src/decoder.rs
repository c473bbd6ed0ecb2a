//! Decoder state machine and its background worker.
//!
//! A [`Decoder`] owns a [`FrameSource`] and, once started, one dedicated
//! thread that repeatedly runs the pre-tick hook, grabs and encodes a frame,
//! notifies observers and sleeps for the source's frame interval.

use crate::encoder::{FrameEncoder, ImageEncoder};
use crate::error::{CaptureError, EncodeError, SourceError};
use crate::format::EncoderConfig;
use crate::frame::{EncodedFrame, Frame};
use crate::pacing::{CancelToken, frame_interval};
use crate::source::FrameSource;
use crate::state::{Command, DecoderState, StateCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::Span;

/// Called on the worker thread after every successful encode. Must not block.
pub type FrameObserver = Arc<dyn Fn(&EncodedFrame) + Send + Sync>;

/// Runs at the start of every tick, before any frame work.
pub type PreTickHook<S> = Box<dyn FnMut(&DecoderCore<S>) + Send>;

pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Error, Debug)]
enum TickError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Geometry and rate, read once so accessors never wait on a busy source.
#[derive(Debug, Clone, Copy)]
struct SourceInfo {
    width: u32,
    height: u32,
    fps: f64,
}

/// State shared between the controlling thread and the worker.
pub struct DecoderCore<S> {
    source: Mutex<S>,
    info: SourceInfo,
    released: AtomicBool,
    state: StateCell,
    latest: RwLock<Option<EncodedFrame>>,
    decoded: Mutex<Option<Arc<Frame>>>,
    observers: Mutex<Vec<FrameObserver>>,
}

impl<S: FrameSource> DecoderCore<S> {
    fn new(source: S) -> Self {
        let info = SourceInfo {
            width: source.width(),
            height: source.height(),
            fps: source.fps(),
        };
        Self {
            released: AtomicBool::new(source.is_released()),
            source: Mutex::new(source),
            info,
            state: StateCell::new(),
            latest: RwLock::new(None),
            decoded: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == DecoderState::Ready
    }

    pub fn is_started(&self) -> bool {
        self.state() == DecoderState::Started
    }

    pub fn is_paused(&self) -> bool {
        self.state() == DecoderState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == DecoderState::Stopped
    }

    /// `Started -> Paused`. Returns whether the transition happened.
    pub fn pause(&self) -> bool {
        let changed = self.state.apply(Command::Pause).is_some();
        if changed {
            tracing::debug!("Decoder paused");
        }
        changed
    }

    /// `Paused -> Started`. Returns whether the transition happened.
    pub fn resume(&self) -> bool {
        let changed = self.state.apply(Command::Resume).is_some();
        if changed {
            tracing::debug!("Decoder resumed");
        }
        changed
    }

    /// Run `f` with exclusive access to the source. The worker takes the same
    /// lock around grab/retrieve, so seeks and property writes never race it.
    pub fn with_source<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut lock(&self.source))
    }

    /// True once `stop` has been requested; the source may still be
    /// finishing an in-flight grab on the worker.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn width(&self) -> u32 {
        if self.is_released() { 0 } else { self.info.width }
    }

    pub fn height(&self) -> u32 {
        if self.is_released() { 0 } else { self.info.height }
    }

    pub fn fps(&self) -> f64 {
        if self.is_released() { 0.0 } else { self.info.fps }
    }

    pub fn latest_frame(&self) -> Option<EncodedFrame> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn latest_decoded(&self) -> Option<Arc<Frame>> {
        lock(&self.decoded).clone()
    }

    fn subscribe(&self, observer: FrameObserver) {
        lock(&self.observers).push(observer);
    }

    fn notify(&self, frame: &EncodedFrame) {
        // Snapshot so observers may subscribe without deadlocking
        let observers = lock(&self.observers).clone();
        for observer in observers {
            observer(frame);
        }
    }

    fn release_source(&self) {
        self.with_source(release_once);
    }

    /// Release unless the worker currently holds the source. Returns false
    /// when busy; the worker then releases it on exit.
    fn try_release_source(&self) -> bool {
        match self.source.try_lock() {
            Ok(mut source) => release_once(&mut *source),
            Err(TryLockError::Poisoned(poisoned)) => release_once(&mut *poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => return false,
        }
        true
    }

    /// Grab, retrieve and encode one frame.
    fn tick(
        &self,
        encoder: &dyn FrameEncoder,
        config: &EncoderConfig,
    ) -> Result<Option<EncodedFrame>, TickError> {
        let frame = {
            let mut source = lock(&self.source);
            if source.is_released() || !source.grab()? {
                return Ok(None);
            }
            source.retrieve()?
        };

        if frame.is_empty() {
            return Ok(None);
        }

        let frame = Arc::new(frame);
        *lock(&self.decoded) = Some(frame.clone());

        let bytes = encoder.encode(&frame, config)?;
        let encoded = EncodedFrame::new(bytes, frame.width, frame.height, config.format());
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(encoded.clone());

        Ok(Some(encoded))
    }
}

fn release_once<S: FrameSource>(source: &mut S) {
    if !source.is_released() {
        source.release();
    }
}

struct Worker {
    cancel: Arc<CancelToken>,
    handle: JoinHandle<()>,
}

/// Lifecycle controller around a frame source.
///
/// Control operations are idempotent: commands that make no sense in the
/// current state are ignored. Dropping the decoder stops it and releases
/// the source.
pub struct Decoder<S: FrameSource> {
    core: Arc<DecoderCore<S>>,
    encoder: Arc<dyn FrameEncoder>,
    config: Arc<EncoderConfig>,
    span: Span,
    hook: Mutex<Option<PreTickHook<S>>>,
    worker: Mutex<Option<Worker>>,
}

impl<S: FrameSource> Decoder<S> {
    /// Build a decoder with the default [`ImageEncoder`].
    pub fn new(source: S, config: EncoderConfig) -> Result<Self, CaptureError> {
        Self::with_encoder(source, config, Arc::new(ImageEncoder))
    }

    pub fn with_encoder(
        source: S,
        config: EncoderConfig,
        encoder: Arc<dyn FrameEncoder>,
    ) -> Result<Self, CaptureError> {
        if !encoder.supports(config.format()) {
            return Err(CaptureError::UnsupportedFormat(config.format()));
        }

        let span = tracing::info_span!("decoder", format = %config.format());

        Ok(Self {
            core: Arc::new(DecoderCore::new(source)),
            encoder,
            config: Arc::new(config),
            span,
            hook: Mutex::new(None),
            worker: Mutex::new(None),
        })
    }

    /// Span the worker runs in; every log line from the loop is attached to it.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Install the hook run at the start of every tick. Only effective
    /// before `start`.
    pub fn with_pre_tick(self, hook: PreTickHook<S>) -> Self {
        *lock(&self.hook) = Some(hook);
        self
    }

    pub fn core(&self) -> &Arc<DecoderCore<S>> {
        &self.core
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Spawn the worker. Ignored unless the decoder is `Ready` and still
    /// holds its source.
    pub fn start(&self) -> Result<(), CaptureError> {
        let mut worker = lock(&self.worker);
        if !self.core.is_ready() || worker.is_some() {
            tracing::debug!(state = ?self.core.state(), "Start ignored");
            return Ok(());
        }

        if self.core.is_released() {
            tracing::debug!("Start ignored: source already released");
            return Ok(());
        }

        self.core.with_source(|s| s.set_fail_fast(true));

        let cancel = Arc::new(CancelToken::new());
        let hook = lock(&self.hook).take();
        let handle = {
            let core = self.core.clone();
            let encoder = self.encoder.clone();
            let config = self.config.clone();
            let cancel = cancel.clone();
            let span = self.span.clone();
            thread::Builder::new()
                .name("capture-decoder".into())
                .spawn(move || {
                    let _enter = span.enter();
                    decode_loop(&core, hook, encoder.as_ref(), &config, &cancel);
                })?
        };

        *worker = Some(Worker { cancel, handle });
        self.core.state.apply(Command::Start);
        tracing::info!(
            width = self.core.width(),
            height = self.core.height(),
            fps = self.core.fps(),
            "Decoder started"
        );
        Ok(())
    }

    pub fn pause(&self) -> bool {
        self.core.pause()
    }

    pub fn resume(&self) -> bool {
        self.core.resume()
    }

    /// Release the source and shut the worker down.
    ///
    /// The source is released even when the decoder never started. If the
    /// worker is inside grab/retrieve, it releases the source itself once
    /// the call returns. With `wait_for_worker` the call blocks until the
    /// worker has exited; there is no timeout, so a source hung inside
    /// grab/retrieve blocks here too. Without it the call never waits on
    /// the source.
    pub fn stop(&self, wait_for_worker: bool) {
        self.core.released.store(true, Ordering::Release);

        let worker = {
            let mut slot = lock(&self.worker);
            if self.core.is_ready() {
                drop(slot);
                self.core.release_source();
                return;
            }
            slot.take()
        };
        let Some(Worker { cancel, handle }) = worker else {
            // Already stopped; a worker left running by stop(false) owns the release
            self.core.try_release_source();
            return;
        };

        cancel.cancel();
        if !self.core.try_release_source() {
            tracing::debug!("Source busy, worker releases it on exit");
        }

        if wait_for_worker {
            if handle.thread().id() == thread::current().id() {
                tracing::debug!("Stop called from the worker thread, not joining");
            } else if handle.join().is_err() {
                tracing::error!("Decoder worker panicked");
            }
        }

        lock(&self.core.observers).clear();
        self.core.state.apply(Command::Stop);
        tracing::info!("Decoder stopped");
    }

    pub fn state(&self) -> DecoderState {
        self.core.state()
    }

    pub fn is_ready(&self) -> bool {
        self.core.is_ready()
    }

    pub fn is_started(&self) -> bool {
        self.core.is_started()
    }

    pub fn is_paused(&self) -> bool {
        self.core.is_paused()
    }

    pub fn is_stopped(&self) -> bool {
        self.core.is_stopped()
    }

    pub fn width(&self) -> u32 {
        self.core.width()
    }

    pub fn height(&self) -> u32 {
        self.core.height()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.core.width(), self.core.height())
    }

    pub fn fps(&self) -> f64 {
        self.core.fps()
    }

    pub fn latest_frame(&self) -> Option<EncodedFrame> {
        self.core.latest_frame()
    }

    pub fn latest_decoded(&self) -> Option<Arc<Frame>> {
        self.core.latest_decoded()
    }

    /// Register a frame-ready observer. Observers are dropped on `stop`.
    pub fn subscribe(&self, observer: impl Fn(&EncodedFrame) + Send + Sync + 'static) {
        self.core.subscribe(Arc::new(observer));
    }
}

impl<S: FrameSource> Drop for Decoder<S> {
    fn drop(&mut self) {
        self.stop(true);
    }
}

fn decode_loop<S: FrameSource>(
    core: &DecoderCore<S>,
    mut hook: Option<PreTickHook<S>>,
    encoder: &dyn FrameEncoder,
    config: &EncoderConfig,
    cancel: &CancelToken,
) {
    tracing::debug!("Decoder worker running");

    let mut frame_count = 0u64;
    let mut error_count = 0u64;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if let Some(hook) = hook.as_mut() {
            hook(core);
        }

        if core.is_started() {
            match core.tick(encoder, config) {
                Ok(Some(frame)) => {
                    frame_count += 1;
                    core.notify(&frame);
                }
                Ok(None) => {}
                Err(e) => {
                    error_count += 1;
                    tracing::debug!(error = %e, "Transient decode error");
                }
            }
        }

        // Paced by the current rate even while paused
        if cancel.wait(frame_interval(core.fps())) {
            break;
        }
    }

    if core.is_released() {
        core.release_source();
    }

    tracing::debug!(
        frames = frame_count,
        errors = error_count,
        "Decoder worker exited"
    );
}

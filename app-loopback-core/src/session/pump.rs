use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::models::config::CaptureConfiguration;
use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::models::packet::AudioPacket;
use crate::models::recording_result::{CaptureStats, RecordingResult};
use crate::models::state::DeviceState;
use crate::processing::render_sink::RenderSink;
use crate::scheduling::event::CompletionSignal;
use crate::scheduling::work_queue::{ThreadInit, WaitKey, WorkQueue};
use crate::session::activation::{self, ActivationRequest};
use crate::storage::wav_writer::WavWriter;
use crate::traits::capture_endpoint::CaptureEndpoint;
use crate::traits::loopback_backend::LoopbackBackend;
use crate::traits::ready_signal::ReadySignal;

/// Capture pump: owns the device state machine and moves packets from the
/// capture endpoint to the render sink and the WAV file.
///
/// All mutable session state sits behind one lock. It is held for a whole
/// drain and for every transition, but never while blocking on a signal,
/// joining threads, or finalizing the WAV file. Work items capture an `Arc` of the pump, so the
/// owner must call [`shutdown`](Self::shutdown) to break the cycle.
pub(crate) struct CapturePump<B: LoopbackBackend> {
    backend: Arc<B>,
    inner: Mutex<PumpInner<B>>,
    stopped: CompletionSignal,
}

struct PumpInner<B: LoopbackBackend> {
    state: DeviceState,
    queue: Option<Arc<WorkQueue>>,
    session: Option<Session<B>>,
    stats: CaptureStats,
    last_error: Option<CaptureError>,
    finalize_error: Option<CaptureError>,
    recording: Option<RecordingResult>,
}

/// Resources of one activated capture.
struct Session<B: LoopbackBackend> {
    format: CaptureFormat,
    endpoint: B::Capture,
    ready_signal: Arc<dyn ReadySignal>,
    sink: Option<RenderSink<B::Render>>,
    writer: Option<WavWriter>,
    wait_key: Option<WaitKey>,
    monitoring: Option<Duration>,
    started_at: DateTime<Utc>,
}

/// A session taken out of the pump for finalization, which runs without
/// the lock held.
struct PendingFinish<B: LoopbackBackend> {
    session: Option<Session<B>>,
}

enum DrainOutcome {
    /// Endpoint has no more packets ready.
    Drained,
    /// The next packet would not fit in the data chunk.
    Full,
}

impl<B: LoopbackBackend> CapturePump<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            inner: Mutex::new(PumpInner {
                state: DeviceState::Uninitialized,
                queue: None,
                session: None,
                stats: CaptureStats::default(),
                last_error: None,
                finalize_error: None,
                recording: None,
            }),
            stopped: CompletionSignal::new(),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> CaptureStats {
        self.inner.lock().stats
    }

    pub fn last_error(&self) -> Option<CaptureError> {
        self.inner.lock().last_error.clone()
    }

    pub fn finalize_error(&self) -> Option<CaptureError> {
        self.inner.lock().finalize_error.clone()
    }

    pub fn recording(&self) -> Option<RecordingResult> {
        self.inner.lock().recording.clone()
    }

    /// Activate, create the WAV file, and schedule the start work item.
    ///
    /// Returns once the start is scheduled; the pump reaches `Capturing`
    /// asynchronously. Callers serialize calls to `start`.
    pub fn start(self: &Arc<Self>, config: &CaptureConfiguration) -> Result<(), CaptureError> {
        let previous_queue = {
            let mut inner = self.inner.lock();
            if !inner.state.can_start() {
                return Err(CaptureError::InvalidState(inner.state));
            }
            inner.queue.take()
        };

        // Jobs still queued from the last session run before the new one exists.
        if let Some(queue) = previous_queue {
            queue.shutdown();
        }

        let backend = Arc::clone(&self.backend);
        let thread_init: ThreadInit = Arc::new(move || backend.enter_worker_thread());
        let queue = match WorkQueue::with_thread_init("loopback", config.worker_threads, Some(thread_init)) {
            Ok(queue) => Arc::new(queue),
            Err(e) => return Err(self.fail(e)),
        };

        {
            let mut inner = self.inner.lock();
            inner.queue = Some(Arc::clone(&queue));
            inner.stats = CaptureStats::default();
            inner.last_error = None;
            inner.finalize_error = None;
            inner.recording = None;
        }
        self.stopped.reset();

        let request = ActivationRequest::from_config(config);
        let activated = match activation::activate(&*self.backend, request, config.activation_timeout) {
            Ok(activated) => activated,
            Err(e) => return Err(self.fail(e)),
        };

        let writer = WavWriter::create(&config.output_path, activated.format).map(|writer| match config.max_data_bytes {
            Some(limit) => writer.with_data_limit(limit),
            None => writer,
        });
        let writer = match writer {
            Ok(writer) => writer,
            Err(e) => return Err(self.fail(e)),
        };

        let mut inner = self.inner.lock();
        inner.session = Some(Session {
            format: activated.format,
            endpoint: activated.endpoint,
            ready_signal: activated.ready_signal,
            sink: None,
            writer: Some(writer),
            wait_key: None,
            monitoring: config.enable_monitoring.then_some(config.render_buffer_duration),
            started_at: Utc::now(),
        });
        inner.state = DeviceState::Initialized;
        log::info!(
            "Capture initialized: process {} ({:?}) -> {}",
            config.process_id,
            config.loopback_mode,
            config.output_path.display()
        );

        inner.state = DeviceState::Starting;
        let pump = Arc::clone(self);
        if let Err(e) = queue.put_work_item(move || pump.on_start()) {
            fail_locked(&mut *inner, e.clone());
            return Err(e);
        }
        Ok(())
    }

    /// Move to `Stopping` and schedule the stop work item.
    ///
    /// Does not wait; see [`wait_stopped`](Self::wait_stopped).
    pub fn request_stop(self: &Arc<Self>) -> Result<(), CaptureError> {
        let pending = self.begin_stop(&mut *self.inner.lock())?;
        self.finish(pending);
        Ok(())
    }

    /// Block until the running session reaches `Stopped`.
    pub fn wait_stopped(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            Some(timeout) => self.stopped.wait_for(timeout),
            None => {
                self.stopped.wait();
                true
            }
        }
    }

    /// Shut down the work queue, then stop inline whatever is still running.
    pub fn shutdown(self: &Arc<Self>) {
        let queue = self.inner.lock().queue.take();
        if let Some(queue) = queue {
            queue.shutdown();
        }

        let pending = {
            let mut inner = self.inner.lock();
            if !inner.state.can_stop() {
                return;
            }
            inner.state = DeviceState::Stopping;
            self.run_stop(&mut *inner)
        };
        self.finish(pending);
    }

    fn fail(&self, error: CaptureError) -> CaptureError {
        fail_locked(&mut *self.inner.lock(), error.clone());
        error
    }

    /// Returns the session to finalize when the stop had to run inline.
    fn begin_stop(self: &Arc<Self>, inner: &mut PumpInner<B>) -> Result<Option<PendingFinish<B>>, CaptureError> {
        if !inner.state.can_stop() {
            return Err(CaptureError::InvalidState(inner.state));
        }
        log::info!("Stopping capture (was {})", inner.state);
        inner.state = DeviceState::Stopping;

        let pump = Arc::clone(self);
        let scheduled = match &inner.queue {
            Some(queue) => queue.put_work_item(move || pump.on_stop()),
            None => Err(CaptureError::Scheduling("no work queue".into())),
        };
        match scheduled {
            Ok(()) => Ok(None),
            Err(e) => {
                log::warn!("Running stop inline: {}", e);
                Ok(self.run_stop(inner))
            }
        }
    }

    fn on_start(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if inner.state != DeviceState::Starting {
            log::debug!("Start work item skipped in the {} state", inner.state);
            return;
        }
        if let Err(e) = self.start_engines(&mut *inner) {
            fail_locked(&mut *inner, e);
        }
    }

    fn start_engines(self: &Arc<Self>, inner: &mut PumpInner<B>) -> Result<(), CaptureError> {
        let session = inner.session.as_mut().ok_or(CaptureError::DeviceNotAvailable)?;
        session.endpoint.start()?;

        if let Some(buffer_duration) = session.monitoring {
            let device = self.backend.open_render_device()?;
            let mut sink = RenderSink::initialize(device, session.format, buffer_duration)?;
            sink.start()?;
            session.sink = Some(sink);
        }

        inner.state = DeviceState::Capturing;
        log::info!("Capture started");
        self.arm(inner)
    }

    /// Register the single drain work item for the next ready signal.
    fn arm(self: &Arc<Self>, inner: &mut PumpInner<B>) -> Result<(), CaptureError> {
        let queue = inner
            .queue
            .as_ref()
            .ok_or_else(|| CaptureError::Scheduling("work queue is shut down".into()))?;
        let session = inner.session.as_mut().ok_or(CaptureError::DeviceNotAvailable)?;

        let pump = Arc::clone(self);
        let key = queue.put_waiting_work_item(Arc::clone(&session.ready_signal), move || pump.on_sample_ready())?;
        session.wait_key = Some(key);
        Ok(())
    }

    fn on_sample_ready(self: &Arc<Self>) {
        let pending = self.drain_and_rearm(&mut *self.inner.lock());
        self.finish(pending);
    }

    fn drain_and_rearm(self: &Arc<Self>, inner: &mut PumpInner<B>) -> Option<PendingFinish<B>> {
        if let Some(session) = inner.session.as_mut() {
            session.wait_key = None;
        }
        if inner.state != DeviceState::Capturing {
            return None;
        }

        match drain(inner) {
            Ok(DrainOutcome::Drained) => {
                if inner.state == DeviceState::Capturing {
                    if let Err(e) = self.arm(inner) {
                        fail_locked(inner, e);
                    }
                }
                None
            }
            Ok(DrainOutcome::Full) => {
                log::info!("Data chunk full, stopping capture");
                self.begin_stop(inner).unwrap_or_else(|e| {
                    log::warn!("Automatic stop refused: {}", e);
                    None
                })
            }
            Err(e) => {
                fail_locked(inner, e);
                None
            }
        }
    }

    fn on_stop(self: &Arc<Self>) {
        let pending = self.run_stop(&mut *self.inner.lock());
        self.finish(pending);
    }

    /// Cancel the pending drain, stop both engines, and schedule finalize.
    ///
    /// When finalize cannot be scheduled, the session is handed back for
    /// the caller to finish once it released the lock.
    fn run_stop(self: &Arc<Self>, inner: &mut PumpInner<B>) -> Option<PendingFinish<B>> {
        let wait_key = inner.session.as_mut().and_then(|s| s.wait_key.take());
        if let (Some(key), Some(queue)) = (wait_key, &inner.queue) {
            queue.cancel_waiting_work_item(key);
        }

        if let Some(session) = inner.session.as_mut() {
            if let Err(e) = session.endpoint.stop() {
                log::warn!("Ignoring capture stop failure: {}", e);
            }
            if let Some(sink) = session.sink.as_mut() {
                if let Err(e) = sink.stop() {
                    log::warn!("Ignoring render stop failure: {}", e);
                }
            }
        }

        let pump = Arc::clone(self);
        let scheduled = match &inner.queue {
            Some(queue) => queue.put_work_item(move || pump.on_finish()),
            None => Err(CaptureError::Scheduling("no work queue".into())),
        };
        match scheduled {
            Ok(()) => None,
            Err(e) => {
                log::debug!("Finalizing inline: {}", e);
                take_for_finish(inner)
            }
        }
    }

    fn on_finish(&self) {
        let pending = take_for_finish(&mut *self.inner.lock());
        self.finish(pending);
    }

    /// Patch the WAV header outside the lock, then publish the outcome and
    /// reach `Stopped` whatever it was.
    fn finish(&self, pending: Option<PendingFinish<B>>) {
        let Some(PendingFinish { session }) = pending else {
            return;
        };

        let outcome = session.and_then(|mut session| {
            let writer = session.writer.take()?;
            let finalized = writer.finalize().map(|finalized| RecordingResult {
                duration_secs: session.format.duration_of_bytes(u64::from(finalized.data_bytes)).as_secs_f64(),
                file_path: finalized.file_path,
                data_bytes: finalized.data_bytes,
                checksum: finalized.checksum,
                started_at: session.started_at,
            });
            Some(finalized)
        });

        let mut inner = self.inner.lock();
        match outcome {
            Some(Ok(recording)) => inner.recording = Some(recording),
            Some(Err(e)) => {
                log::error!("Failed to finalize recording: {}", e);
                inner.finalize_error = Some(e.clone());
                inner.last_error = Some(e);
            }
            None => {}
        }

        inner.state = DeviceState::Stopped;
        log::info!(
            "Capture stopped: {} packets, {} frames",
            inner.stats.packets_drained,
            inner.stats.frames_captured
        );
        self.stopped.set();
    }
}

/// Take the session out for [`CapturePump::finish`]. `None` unless a stop is
/// in progress, so a stale finalize work item is a no-op.
fn take_for_finish<B: LoopbackBackend>(inner: &mut PumpInner<B>) -> Option<PendingFinish<B>> {
    if inner.state != DeviceState::Stopping {
        log::debug!("Finalize skipped in the {} state", inner.state);
        return None;
    }
    Some(PendingFinish {
        session: inner.session.take(),
    })
}

fn fail_locked<B: LoopbackBackend>(inner: &mut PumpInner<B>, error: CaptureError) {
    log::error!("Capture failed in the {} state: {}", inner.state, error);
    inner.state = DeviceState::Error;
    inner.last_error = Some(error);
}

/// Pull every ready packet into the render sink and the WAV file.
fn drain<B: LoopbackBackend>(inner: &mut PumpInner<B>) -> Result<DrainOutcome, CaptureError> {
    let PumpInner { session, stats, .. } = inner;
    let Session {
        format,
        endpoint,
        sink,
        writer,
        ..
    } = session.as_mut().ok_or(CaptureError::DeviceNotAvailable)?;
    let writer = writer
        .as_mut()
        .ok_or_else(|| CaptureError::StorageError("recording already finalized".into()))?;

    loop {
        let frames = endpoint.next_packet_frames()?;
        if frames == 0 {
            return Ok(DrainOutcome::Drained);
        }
        if writer.would_overflow(format.bytes_for_frames(frames)) {
            return Ok(DrainOutcome::Full);
        }

        endpoint.read_packet(&mut |packet: &AudioPacket<'_>| -> Result<(), CaptureError> {
            stats.packets_drained += 1;
            stats.frames_captured += u64::from(packet.frames);
            if packet.flags.silent {
                stats.silent_packets += 1;
            }
            if packet.flags.discontinuity {
                stats.discontinuities += 1;
                log::debug!(
                    "Discontinuity at device position {} (qpc {})",
                    packet.device_position,
                    packet.qpc_position
                );
            }
            if packet.flags.timestamp_error {
                stats.timestamp_errors += 1;
                log::trace!("Timestamp error at device position {}", packet.device_position);
            }

            if let Some(sink) = sink.as_mut() {
                let written = sink.push(packet.data, packet.frames)?;
                stats.frames_monitored += u64::from(written);
                let dropped = packet.frames.saturating_sub(written);
                if dropped > 0 {
                    stats.frames_dropped += u64::from(dropped);
                    log::trace!("Render buffer full, dropped {} frames", dropped);
                }
            }

            writer.append(packet.data)?;
            Ok(())
        })?;
    }
}

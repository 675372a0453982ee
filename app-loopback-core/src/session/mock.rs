//! In-memory backend used by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::models::packet::{AudioPacket, PacketFlags};
use crate::scheduling::event::AutoResetEvent;
use crate::session::activation::{ActivatedCapture, ActivationCompletion, ActivationRequest};
use crate::traits::capture_endpoint::{CaptureEndpoint, PacketConsumer};
use crate::traits::loopback_backend::{LoopbackBackend, ThreadGuard};
use crate::traits::render_device::RenderDevice;

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[derive(Debug, Clone)]
pub enum ActivationBehavior {
    /// Complete successfully from another thread.
    Succeed,
    /// Complete with an error from another thread.
    Fail(CaptureError),
    /// Return the error from `begin_activation` itself.
    Reject(CaptureError),
    /// Drop the completion without reporting.
    Drop,
    /// Succeed after a delay.
    Delay(Duration),
}

struct ScriptedPacket {
    data: Vec<u8>,
    frames: u32,
    flags: PacketFlags,
}

#[derive(Default)]
struct CaptureScript {
    packets: VecDeque<ScriptedPacket>,
    running: bool,
    starts: usize,
    fail_reads: Option<CaptureError>,
    fail_start: Option<CaptureError>,
}

/// Capture endpoint that replays packets queued by the test.
#[derive(Clone, Default)]
pub struct FakeCaptureEndpoint {
    script: Arc<Mutex<CaptureScript>>,
}

impl FakeCaptureEndpoint {
    pub fn queue_packet(&self, data: Vec<u8>, frames: u32, flags: PacketFlags) {
        self.script.lock().packets.push_back(ScriptedPacket { data, frames, flags });
    }

    pub fn fail_reads(&self, error: CaptureError) {
        self.script.lock().fail_reads = Some(error);
    }

    pub fn fail_start(&self, error: CaptureError) {
        self.script.lock().fail_start = Some(error);
    }

    pub fn is_running(&self) -> bool {
        self.script.lock().running
    }

    pub fn starts(&self) -> usize {
        self.script.lock().starts
    }

    pub fn pending_packets(&self) -> usize {
        self.script.lock().packets.len()
    }
}

impl CaptureEndpoint for FakeCaptureEndpoint {
    fn start(&mut self) -> Result<(), CaptureError> {
        let mut script = self.script.lock();
        if let Some(err) = script.fail_start.take() {
            return Err(err);
        }
        script.running = true;
        script.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.script.lock().running = false;
        Ok(())
    }

    fn next_packet_frames(&mut self) -> Result<u32, CaptureError> {
        let script = self.script.lock();
        if let Some(err) = &script.fail_reads {
            return Err(err.clone());
        }
        Ok(script.packets.front().map(|p| p.frames).unwrap_or(0))
    }

    fn read_packet(&mut self, consume: &mut PacketConsumer<'_>) -> Result<u32, CaptureError> {
        let packet = self
            .script
            .lock()
            .packets
            .pop_front()
            .ok_or_else(|| CaptureError::Unknown("no packet available".into()))?;

        let mut view = AudioPacket::new(&packet.data, packet.frames);
        view.flags = packet.flags;
        consume(&view)?;
        Ok(packet.frames)
    }
}

#[derive(Default)]
struct RenderState {
    capacity: u32,
    padding: u32,
    running: bool,
    written: Vec<u8>,
    frames_written: u64,
    write_calls: usize,
}

/// Render device with a test-controlled padding level.
#[derive(Clone, Default)]
pub struct FakeRenderDevice {
    state: Arc<Mutex<RenderState>>,
}

impl FakeRenderDevice {
    pub fn new(capacity: u32) -> Self {
        let device = Self::default();
        device.state.lock().capacity = capacity;
        device
    }

    pub fn set_padding(&self, padding: u32) {
        self.state.lock().padding = padding;
    }

    pub fn frames_written(&self) -> u64 {
        self.state.lock().frames_written
    }

    pub fn written_bytes(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    pub fn write_calls(&self) -> usize {
        self.state.lock().write_calls
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

impl RenderDevice for FakeRenderDevice {
    fn initialize(&mut self, _format: &CaptureFormat, _buffer_duration: Duration) -> Result<u32, CaptureError> {
        Ok(self.state.lock().capacity)
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        self.state.lock().running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.state.lock().running = false;
        Ok(())
    }

    fn current_padding(&mut self) -> Result<u32, CaptureError> {
        Ok(self.state.lock().padding)
    }

    fn write_frames(&mut self, data: &[u8], frames: u32) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if frames > state.capacity.saturating_sub(state.padding) {
            return Err(CaptureError::platform("IAudioRenderClient::GetBuffer", 0x8889_0006u32 as i32));
        }
        state.written.extend_from_slice(data);
        state.frames_written += u64::from(frames);
        state.write_calls += 1;
        Ok(())
    }
}

/// Backend wiring the fakes together. Clones share all state.
#[derive(Clone)]
pub struct FakeBackend {
    capture: FakeCaptureEndpoint,
    render: FakeRenderDevice,
    event: Arc<AutoResetEvent>,
    activation: Arc<Mutex<ActivationBehavior>>,
    requests: Arc<Mutex<Vec<ActivationRequest>>>,
    render_opens: Arc<AtomicUsize>,
    worker_inits: Arc<AtomicUsize>,
}

impl FakeBackend {
    /// Render buffer of 200ms at 44.1kHz.
    pub const RENDER_CAPACITY: u32 = 8820;

    pub fn new() -> Self {
        Self {
            capture: FakeCaptureEndpoint::default(),
            render: FakeRenderDevice::new(Self::RENDER_CAPACITY),
            event: Arc::new(AutoResetEvent::new()),
            activation: Arc::new(Mutex::new(ActivationBehavior::Succeed)),
            requests: Arc::new(Mutex::new(Vec::new())),
            render_opens: Arc::new(AtomicUsize::new(0)),
            worker_inits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_activation(&self, behavior: ActivationBehavior) {
        *self.activation.lock() = behavior;
    }

    pub fn requests(&self) -> Vec<ActivationRequest> {
        self.requests.lock().clone()
    }

    pub fn capture(&self) -> &FakeCaptureEndpoint {
        &self.capture
    }

    pub fn render(&self) -> &FakeRenderDevice {
        &self.render
    }

    pub fn render_opens(&self) -> usize {
        self.render_opens.load(Ordering::SeqCst)
    }

    pub fn worker_inits(&self) -> usize {
        self.worker_inits.load(Ordering::SeqCst)
    }

    /// Queue `frames` frames of canonical PCM filled with `fill` and fire
    /// the ready signal.
    pub fn deliver(&self, frames: u32, fill: u8) -> Vec<u8> {
        let data = vec![fill; CaptureFormat::canonical().bytes_for_frames(frames)];
        self.capture.queue_packet(data.clone(), frames, PacketFlags::default());
        self.event.set();
        data
    }

    pub fn deliver_with_flags(&self, frames: u32, flags: PacketFlags) {
        let data = vec![0u8; CaptureFormat::canonical().bytes_for_frames(frames)];
        self.capture.queue_packet(data, frames, flags);
        self.event.set();
    }

    /// Fire the ready signal without queueing anything.
    pub fn signal(&self) {
        self.event.set();
    }

    fn activated(&self) -> ActivatedCapture<FakeCaptureEndpoint> {
        ActivatedCapture {
            format: CaptureFormat::canonical(),
            endpoint: self.capture.clone(),
            ready_signal: self.event.clone(),
        }
    }
}

impl LoopbackBackend for FakeBackend {
    type Capture = FakeCaptureEndpoint;
    type Render = FakeRenderDevice;

    fn begin_activation(
        &self,
        request: ActivationRequest,
        completion: ActivationCompletion<Self::Capture>,
    ) -> Result<(), CaptureError> {
        self.requests.lock().push(request);

        let behavior = self.activation.lock().clone();
        let backend = self.clone();
        match behavior {
            ActivationBehavior::Succeed => {
                thread::spawn(move || completion.complete(Ok(backend.activated())));
            }
            ActivationBehavior::Delay(delay) => {
                thread::spawn(move || {
                    thread::sleep(delay);
                    completion.complete(Ok(backend.activated()));
                });
            }
            ActivationBehavior::Fail(err) => {
                thread::spawn(move || completion.complete(Err(err)));
            }
            ActivationBehavior::Drop => {
                thread::spawn(move || drop(completion));
            }
            ActivationBehavior::Reject(err) => return Err(err),
        }
        Ok(())
    }

    fn open_render_device(&self) -> Result<Self::Render, CaptureError> {
        self.render_opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.render.clone())
    }

    fn enter_worker_thread(&self) -> Option<ThreadGuard> {
        self.worker_inits.fetch_add(1, Ordering::SeqCst);
        None
    }
}

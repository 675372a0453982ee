//! # app-loopback-core
//!
//! Platform-agnostic core of process loopback capture.
//!
//! Records the audio rendered by one process tree (or by everything except
//! that tree) to a PCM WAV file while piping it to the default output
//! device. Platform backends implement [`LoopbackBackend`] and plug into
//! the generic [`LoopbackCapture`].
//!
//! ## Architecture
//!
//! ```text
//! app-loopback-core (this crate)
//! ├── traits/       ← LoopbackBackend, CaptureEndpoint, RenderDevice, ReadySignal
//! ├── models/       ← CaptureError, DeviceState, CaptureConfiguration, CaptureFormat, etc.
//! ├── processing/   ← WAV header layout, RenderSink (drop-on-full monitoring)
//! ├── scheduling/   ← WorkQueue with waiting work items, events
//! ├── session/      ← activation handoff, capture pump, LoopbackCapture
//! └── storage/      ← WavWriter
//! ```

pub mod models;
pub mod processing;
pub mod scheduling;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::config::{CaptureConfiguration, LoopbackMode};
pub use models::error::CaptureError;
pub use models::format::CaptureFormat;
pub use models::packet::{AudioPacket, PacketFlags};
pub use models::recording_result::{CaptureStats, RecordingResult};
pub use models::state::DeviceState;
pub use processing::render_sink::RenderSink;
pub use scheduling::event::{AutoResetEvent, CompletionSignal};
pub use scheduling::work_queue::{WaitKey, WorkQueue};
pub use session::activation::{ActivatedCapture, ActivationCompletion, ActivationRequest, ActivationResult};
pub use session::loopback::LoopbackCapture;
pub use storage::wav_writer::{FinalizedWav, WavWriter};
pub use traits::capture_endpoint::{CaptureEndpoint, PacketConsumer};
pub use traits::loopback_backend::{LoopbackBackend, ThreadGuard};
pub use traits::ready_signal::ReadySignal;
pub use traits::render_device::RenderDevice;

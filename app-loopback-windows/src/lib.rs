//! # app-loopback-windows
//!
//! Windows WASAPI backend for app-loopback.
//!
//! Provides:
//! - `ProcessLoopbackBackend`: process loopback activation via `ActivateAudioInterfaceAsync`
//! - `WasapiCaptureEndpoint`: event-driven loopback capture stream
//! - `WasapiRenderDevice`: default render endpoint used for monitoring
//! - `ComApartment`: MTA membership guard for threads that call into WASAPI
//!
//! ## Platform Requirements
//! - Windows 10 build 20348+ (process loopback activation)
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use app_loopback_core::{CaptureConfiguration, LoopbackCapture};
//! use app_loopback_windows::{ComApartment, ProcessLoopbackBackend};
//!
//! let _com = ComApartment::enter_mta()?;
//! let capture = LoopbackCapture::new(ProcessLoopbackBackend::new());
//! capture.start_capture(CaptureConfiguration::new(pid, true, "out.wav"))?;
//! ```

#[cfg(target_os = "windows")]
pub mod capture_endpoint;
#[cfg(target_os = "windows")]
pub mod com;
#[cfg(target_os = "windows")]
pub mod event;
#[cfg(target_os = "windows")]
pub mod process_loopback;
#[cfg(target_os = "windows")]
pub mod render_device;
#[cfg(target_os = "windows")]
pub mod wave_format;

#[cfg(target_os = "windows")]
pub use capture_endpoint::WasapiCaptureEndpoint;
#[cfg(target_os = "windows")]
pub use com::ComApartment;
#[cfg(target_os = "windows")]
pub use process_loopback::ProcessLoopbackBackend;
#[cfg(target_os = "windows")]
pub use render_device::WasapiRenderDevice;

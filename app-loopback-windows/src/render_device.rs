use std::time::Duration;

use windows::Win32::Media::Audio::{
    eConsole, eRender, IAudioClient, IAudioRenderClient, IMMDeviceEnumerator, MMDeviceEnumerator,
    AUDCLNT_SHAREMODE_SHARED,
};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL};

use app_loopback_core::models::error::CaptureError;
use app_loopback_core::models::format::CaptureFormat;
use app_loopback_core::traits::render_device::RenderDevice;

use crate::com::PlatformResultExt;
use crate::wave_format::{reference_time, to_wave_format};

/// The default console render endpoint, used to monitor the capture.
pub struct WasapiRenderDevice {
    audio_client: IAudioClient,
    render_client: Option<IAudioRenderClient>,
    format: CaptureFormat,
}

// SAFETY: created on an MTA worker thread; the pump serializes every call
// behind its lock.
unsafe impl Send for WasapiRenderDevice {}

impl WasapiRenderDevice {
    /// Open the default render endpoint. Requires COM on the calling thread.
    pub fn open_default() -> Result<Self, CaptureError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL).platform("CoCreateInstance(MMDeviceEnumerator)")?;

            let device = enumerator
                .GetDefaultAudioEndpoint(eRender, eConsole)
                .map_err(|_| CaptureError::DeviceNotAvailable)?;

            let audio_client: IAudioClient = device.Activate(CLSCTX_ALL, None).platform("IMMDevice::Activate")?;

            Ok(Self {
                audio_client,
                render_client: None,
                format: CaptureFormat::canonical(),
            })
        }
    }

    fn render_client(&self) -> Result<&IAudioRenderClient, CaptureError> {
        self.render_client
            .as_ref()
            .ok_or_else(|| CaptureError::ConfigurationFailed("render device not initialized".into()))
    }
}

impl RenderDevice for WasapiRenderDevice {
    fn initialize(&mut self, format: &CaptureFormat, buffer_duration: Duration) -> Result<u32, CaptureError> {
        let wave_format = to_wave_format(format);
        unsafe {
            self.audio_client
                .Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    0,
                    reference_time(buffer_duration),
                    0,
                    &wave_format,
                    None,
                )
                .platform("IAudioClient::Initialize (render)")?;

            let buffer_frames = self.audio_client.GetBufferSize().platform("IAudioClient::GetBufferSize")?;
            let render_client: IAudioRenderClient = self.audio_client.GetService().platform("IAudioClient::GetService")?;

            self.render_client = Some(render_client);
            self.format = *format;
            Ok(buffer_frames)
        }
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        unsafe { self.audio_client.Start() }.platform("IAudioClient::Start (render)")
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        unsafe { self.audio_client.Stop() }.platform("IAudioClient::Stop (render)")
    }

    fn current_padding(&mut self) -> Result<u32, CaptureError> {
        unsafe { self.audio_client.GetCurrentPadding() }.platform("IAudioClient::GetCurrentPadding")
    }

    fn write_frames(&mut self, data: &[u8], frames: u32) -> Result<(), CaptureError> {
        let len = self.format.bytes_for_frames(frames).min(data.len());
        let render_client = self.render_client()?;
        unsafe {
            let buffer = render_client.GetBuffer(frames).platform("IAudioRenderClient::GetBuffer")?;
            // SAFETY: GetBuffer returned room for `frames` frames.
            std::ptr::copy_nonoverlapping(data.as_ptr(), buffer, len);
            render_client
                .ReleaseBuffer(frames, 0)
                .platform("IAudioRenderClient::ReleaseBuffer")
        }
    }
}

use std::slice;

use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, AUDCLNT_BUFFERFLAGS_DATA_DISCONTINUITY, AUDCLNT_BUFFERFLAGS_SILENT,
    AUDCLNT_BUFFERFLAGS_TIMESTAMP_ERROR,
};

use app_loopback_core::models::error::CaptureError;
use app_loopback_core::models::format::CaptureFormat;
use app_loopback_core::models::packet::{AudioPacket, PacketFlags};
use app_loopback_core::traits::capture_endpoint::{CaptureEndpoint, PacketConsumer};

use crate::com::PlatformResultExt;

/// Process loopback stream initialized in event-driven shared mode.
///
/// Silent packets are handed on as zeroed bytes, so consumers never see
/// whatever the engine left in the buffer.
pub struct WasapiCaptureEndpoint {
    audio_client: IAudioClient,
    capture_client: IAudioCaptureClient,
    format: CaptureFormat,
    silence: Vec<u8>,
}

// SAFETY: both interfaces come from the process loopback virtual device,
// which is free-threaded; the pump serializes every call behind its lock.
unsafe impl Send for WasapiCaptureEndpoint {}

impl WasapiCaptureEndpoint {
    pub(crate) fn new(audio_client: IAudioClient, capture_client: IAudioCaptureClient, format: CaptureFormat) -> Self {
        Self {
            audio_client,
            capture_client,
            format,
            silence: Vec::new(),
        }
    }
}

impl CaptureEndpoint for WasapiCaptureEndpoint {
    fn start(&mut self) -> Result<(), CaptureError> {
        unsafe { self.audio_client.Start() }.platform("IAudioClient::Start")
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        unsafe { self.audio_client.Stop() }.platform("IAudioClient::Stop")
    }

    fn next_packet_frames(&mut self) -> Result<u32, CaptureError> {
        unsafe { self.capture_client.GetNextPacketSize() }.platform("IAudioCaptureClient::GetNextPacketSize")
    }

    fn read_packet(&mut self, consume: &mut PacketConsumer<'_>) -> Result<u32, CaptureError> {
        let mut data: *mut u8 = std::ptr::null_mut();
        let mut frames: u32 = 0;
        let mut flags: u32 = 0;
        let mut device_position: u64 = 0;
        let mut qpc_position: u64 = 0;

        unsafe {
            self.capture_client.GetBuffer(
                &mut data,
                &mut frames,
                &mut flags,
                Some(&mut device_position as *mut u64),
                Some(&mut qpc_position as *mut u64),
            )
        }
        .platform("IAudioCaptureClient::GetBuffer")?;

        let packet_flags = PacketFlags {
            silent: flags & AUDCLNT_BUFFERFLAGS_SILENT.0 as u32 != 0,
            discontinuity: flags & AUDCLNT_BUFFERFLAGS_DATA_DISCONTINUITY.0 as u32 != 0,
            timestamp_error: flags & AUDCLNT_BUFFERFLAGS_TIMESTAMP_ERROR.0 as u32 != 0,
        };
        let len = self.format.bytes_for_frames(frames);

        let consumed = {
            let bytes: &[u8] = if packet_flags.silent || data.is_null() {
                self.silence.clear();
                self.silence.resize(len, 0);
                &self.silence
            } else {
                // SAFETY: GetBuffer returned `frames` frames of the negotiated
                // format, valid until ReleaseBuffer.
                unsafe { slice::from_raw_parts(data, len) }
            };

            let packet = AudioPacket {
                data: bytes,
                frames,
                flags: packet_flags,
                device_position,
                qpc_position,
            };
            consume(&packet)
        };

        // Released whether or not the consumer accepted the packet.
        unsafe { self.capture_client.ReleaseBuffer(frames) }.platform("IAudioCaptureClient::ReleaseBuffer")?;

        consumed.map(|()| frames)
    }
}

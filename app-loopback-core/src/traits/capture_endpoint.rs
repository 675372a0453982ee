use crate::models::error::CaptureError;
use crate::models::packet::AudioPacket;

/// Consumer handed one packet at a time by [`CaptureEndpoint::read_packet`].
pub type PacketConsumer<'c> = dyn FnMut(&AudioPacket<'_>) -> Result<(), CaptureError> + 'c;

/// An activated, initialized loopback capture stream.
///
/// Implemented by `WasapiCaptureEndpoint` on Windows. The endpoint is owned
/// by the capture pump and only touched with the pump lock held.
pub trait CaptureEndpoint: Send + 'static {
    /// Start the capture engine. Notifications begin firing afterwards.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Stop the capture engine. Packets already queued stay readable.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Frames in the next packet, or 0 when nothing is ready.
    fn next_packet_frames(&mut self) -> Result<u32, CaptureError>;

    /// Retrieve the next packet, pass it to `consume`, then release it.
    ///
    /// The packet is released even when `consume` fails; the consumer's
    /// error is returned in that case. Returns the number of frames read.
    fn read_packet(&mut self, consume: &mut PacketConsumer<'_>) -> Result<u32, CaptureError>;
}

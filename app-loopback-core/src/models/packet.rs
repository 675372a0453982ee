/// Flags reported by the capture transport for one packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags {
    /// The endpoint reported silence; `data` is already zeroed.
    pub silent: bool,
    /// A glitch occurred between this packet and the previous one.
    pub discontinuity: bool,
    pub timestamp_error: bool,
}

/// One buffer of captured audio, borrowed from the capture transport.
///
/// The transport owns the memory and releases it once the consumer passed
/// to [`CaptureEndpoint::read_packet`](crate::traits::capture_endpoint::CaptureEndpoint::read_packet)
/// returns.
#[derive(Debug, Clone, Copy)]
pub struct AudioPacket<'a> {
    pub data: &'a [u8],
    pub frames: u32,
    pub flags: PacketFlags,
    /// Position of the first frame in the device stream, in frames.
    pub device_position: u64,
    /// Performance-counter timestamp of the first frame, in 100ns units.
    pub qpc_position: u64,
}

impl<'a> AudioPacket<'a> {
    pub fn new(data: &'a [u8], frames: u32) -> Self {
        Self {
            data,
            frames,
            flags: PacketFlags::default(),
            device_position: 0,
            qpc_position: 0,
        }
    }
}

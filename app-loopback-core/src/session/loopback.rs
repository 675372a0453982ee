use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::config::CaptureConfiguration;
use crate::models::error::CaptureError;
use crate::models::recording_result::{CaptureStats, RecordingResult};
use crate::models::state::DeviceState;
use crate::session::pump::CapturePump;
use crate::traits::loopback_backend::LoopbackBackend;

/// Captures the audio of one process tree to a WAV file while monitoring
/// it on the default output device.
///
/// ```text
/// start_capture ─→ [activate] ─→ [create WAV] ─→ Starting ─→ Capturing
///                                                               │
///                                              ready signal ─→ drain ─┐
///                                                               ↑     │
///                                                               └─────┘
/// stop_capture ─→ Stopping ─→ [stop engines] ─→ [finalize WAV] ─→ Stopped
/// ```
///
/// `stop_capture` may be called from any thread. Dropping a running
/// capture stops it and finalizes the file.
pub struct LoopbackCapture<B: LoopbackBackend> {
    pump: Arc<CapturePump<B>>,
    start_lock: Mutex<()>,
}

impl<B: LoopbackBackend> LoopbackCapture<B> {
    pub fn new(backend: B) -> Self {
        Self {
            pump: Arc::new(CapturePump::new(Arc::new(backend))),
            start_lock: Mutex::new(()),
        }
    }

    /// Activate loopback for `config.process_id` and start recording to
    /// `config.output_path`.
    ///
    /// Returns once activation and file creation succeeded and the start is
    /// scheduled. Valid from `Uninitialized` or `Stopped`; any failure
    /// leaves the capture in `Error` until it is stopped.
    pub fn start_capture(&self, config: CaptureConfiguration) -> Result<(), CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;

        let _serialized = self.start_lock.lock();
        self.pump.start(&config)
    }

    /// Stop capturing and block until the file is finalized.
    ///
    /// Valid from `Capturing` or `Error`. The capture always ends in
    /// `Stopped`; an error is returned only if the file could not be
    /// finalized.
    pub fn stop_capture(&self) -> Result<(), CaptureError> {
        self.pump.request_stop()?;
        self.pump.wait_stopped(None);
        self.finalize_result()
    }

    /// Let a started capture run for `duration`, then stop it.
    ///
    /// A capture that stops on its own first (full file), or is already
    /// stopping when the time is up, is waited for instead of reported as
    /// an invalid stop.
    pub fn run_for(&self, duration: Duration) -> Result<(), CaptureError> {
        if self.pump.wait_stopped(Some(duration)) {
            log::info!("Capture stopped before the requested {:?}", duration);
            return self.finalize_result();
        }
        match self.stop_capture() {
            Err(CaptureError::InvalidState(state)) if state == DeviceState::Stopping || state.is_terminal() => {
                self.pump.wait_stopped(None);
                self.finalize_result()
            }
            result => result,
        }
    }

    /// Wait for the capture to reach `Stopped`, e.g. after it stopped
    /// itself because the file is full. Returns `false` on timeout.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        self.pump.wait_stopped(Some(timeout))
    }

    pub fn state(&self) -> DeviceState {
        self.pump.state()
    }

    pub fn stats(&self) -> CaptureStats {
        self.pump.stats()
    }

    /// Most recent failure, cleared by the next start.
    pub fn last_error(&self) -> Option<CaptureError> {
        self.pump.last_error()
    }

    /// The finalized recording of the last session.
    pub fn recording(&self) -> Option<RecordingResult> {
        self.pump.recording()
    }

    fn finalize_result(&self) -> Result<(), CaptureError> {
        match self.pump.finalize_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<B: LoopbackBackend> Drop for LoopbackCapture<B> {
    fn drop(&mut self) {
        if self.pump.state().can_stop() {
            if let Err(e) = self.stop_capture() {
                log::warn!("Stop on drop failed: {}", e);
            }
        }
        self.pump.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::LoopbackMode;
    use crate::models::format::CaptureFormat;
    use crate::models::packet::PacketFlags;
    use crate::processing::wav_format::{WavHeader, WAV_HEADER_SIZE};
    use crate::session::activation::ActivationRequest;
    use crate::session::mock::{wait_until, ActivationBehavior, FakeBackend};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::thread;

    fn temp_file_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("app_loopback_test_{}_{}", std::process::id(), name))
    }

    fn start(backend: &FakeBackend, config: CaptureConfiguration) -> LoopbackCapture<FakeBackend> {
        let capture = LoopbackCapture::new(backend.clone());
        capture.start_capture(config).unwrap();
        assert!(wait_until(|| capture.state() == DeviceState::Capturing));
        capture
    }

    fn deliver_and_wait(capture: &LoopbackCapture<FakeBackend>, backend: &FakeBackend, frames: u32, fill: u8) -> Vec<u8> {
        let expected = capture.stats().frames_captured + u64::from(frames);
        let data = backend.deliver(frames, fill);
        assert!(wait_until(|| capture.stats().frames_captured == expected));
        data
    }

    fn read_wav(path: &Path) -> (WavHeader, Vec<u8>) {
        let bytes = fs::read(path).unwrap();
        let header = WavHeader::parse(&bytes).unwrap();
        (header, bytes[WAV_HEADER_SIZE..].to_vec())
    }

    #[test]
    fn records_exclude_tree_capture_end_to_end() {
        let path = temp_file_path("end_to_end.wav");
        let backend = FakeBackend::new();
        let capture = start(&backend, CaptureConfiguration::new(4242, false, &path));

        assert_eq!(
            backend.requests(),
            vec![ActivationRequest {
                process_id: 4242,
                mode: LoopbackMode::ExcludeTargetProcessTree,
                buffer_duration: Duration::from_millis(200),
            }]
        );

        let mut expected = Vec::new();
        for (frames, fill) in [(100, 1u8), (250, 2), (100, 3)] {
            expected.extend(deliver_and_wait(&capture, &backend, frames, fill));
        }

        capture.stop_capture().unwrap();
        assert_eq!(capture.state(), DeviceState::Stopped);

        let (header, body) = read_wav(&path);
        assert_eq!(header.data_size, 1800);
        assert_eq!(header.riff_size, 1836);
        assert_eq!(header.format, CaptureFormat::canonical());
        assert_eq!(body, expected);

        let stats = capture.stats();
        assert_eq!(stats.packets_drained, 3);
        assert_eq!(stats.frames_captured, 450);
        assert_eq!(stats.frames_monitored, 450);
        assert_eq!(stats.frames_dropped, 0);
        assert_eq!(backend.render().written_bytes(), expected);
        assert!(!backend.render().is_running());
        assert!(!backend.capture().is_running());

        let recording = capture.recording().unwrap();
        assert_eq!(recording.data_bytes, 1800);
        assert_eq!(recording.file_path, path);
        assert!((recording.duration_secs - 1800.0 / 176_400.0).abs() < 1e-9);
        assert_eq!(recording.checksum.len(), 64);

        drop(capture);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn second_stop_is_invalid_and_does_not_refinalize() {
        let path = temp_file_path("second_stop.wav");
        let backend = FakeBackend::new();
        let capture = start(&backend, CaptureConfiguration::new(7, true, &path));
        deliver_and_wait(&capture, &backend, 10, 9);

        capture.stop_capture().unwrap();
        let first = fs::read(&path).unwrap();

        let err = capture.stop_capture().unwrap_err();
        assert_eq!(err, CaptureError::InvalidState(DeviceState::Stopped));
        assert_eq!(fs::read(&path).unwrap(), first);

        drop(capture);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn stop_before_start_is_invalid() {
        let capture = LoopbackCapture::new(FakeBackend::new());
        let err = capture.stop_capture().unwrap_err();
        assert_eq!(err, CaptureError::InvalidState(DeviceState::Uninitialized));
    }

    #[test]
    fn start_while_capturing_is_invalid() {
        let path = temp_file_path("double_start.wav");
        let backend = FakeBackend::new();
        let capture = start(&backend, CaptureConfiguration::new(7, true, &path));

        let err = capture.start_capture(CaptureConfiguration::new(7, true, &path)).unwrap_err();
        assert_eq!(err, CaptureError::InvalidState(DeviceState::Capturing));
        assert_eq!(capture.state(), DeviceState::Capturing);

        capture.stop_capture().unwrap();
        drop(capture);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn invalid_configuration_is_rejected_before_activation() {
        let backend = FakeBackend::new();
        let capture = LoopbackCapture::new(backend.clone());
        let mut config = CaptureConfiguration::new(7, true, "out.wav");
        config.worker_threads = 0;

        let err = capture.start_capture(config).unwrap_err();
        assert!(matches!(err, CaptureError::ConfigurationFailed(_)));
        assert!(backend.requests().is_empty());
        assert_eq!(capture.state(), DeviceState::Uninitialized);
    }

    #[test]
    fn overflow_stops_capture_with_pre_trigger_data() {
        let path = temp_file_path("overflow.wav");
        let backend = FakeBackend::new();
        let mut config = CaptureConfiguration::new(7, false, &path);
        config.max_data_bytes = Some(1000);
        let capture = start(&backend, config);

        // 400 + 400 + 200 lands exactly on the limit
        deliver_and_wait(&capture, &backend, 100, 1);
        deliver_and_wait(&capture, &backend, 100, 2);
        deliver_and_wait(&capture, &backend, 50, 3);
        assert_eq!(capture.state(), DeviceState::Capturing);

        backend.deliver(1, 4);
        assert!(capture.wait_stopped(Duration::from_secs(5)));
        assert_eq!(capture.state(), DeviceState::Stopped);
        assert_eq!(capture.last_error(), None);
        assert_eq!(backend.capture().pending_packets(), 1);

        let (header, body) = read_wav(&path);
        assert_eq!(header.data_size, 1000);
        assert_eq!(body.len(), 1000);
        assert!(body.iter().all(|&b| b != 4));

        let err = capture.stop_capture().unwrap_err();
        assert!(err.is_invalid_state());

        drop(capture);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn device_failure_forces_error_and_stop_still_finalizes() {
        let path = temp_file_path("device_failure.wav");
        let backend = FakeBackend::new();
        let capture = start(&backend, CaptureConfiguration::new(7, true, &path));
        deliver_and_wait(&capture, &backend, 100, 5);

        let failure = CaptureError::platform("IAudioCaptureClient::GetNextPacketSize", 0x8889_0004u32 as i32);
        backend.capture().fail_reads(failure.clone());
        backend.signal();
        assert!(wait_until(|| capture.state() == DeviceState::Error));
        assert_eq!(capture.last_error(), Some(failure.clone()));

        capture.stop_capture().unwrap();
        assert_eq!(capture.state(), DeviceState::Stopped);
        assert_eq!(capture.last_error(), Some(failure));

        let (header, body) = read_wav(&path);
        assert_eq!(header.data_size, 400);
        assert_eq!(body, vec![5u8; 400]);

        drop(capture);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn start_failure_forces_error() {
        let path = temp_file_path("start_failure.wav");
        let backend = FakeBackend::new();
        backend
            .capture()
            .fail_start(CaptureError::platform("IAudioClient::Start", 0x8889_0002u32 as i32));

        let capture = LoopbackCapture::new(backend.clone());
        capture.start_capture(CaptureConfiguration::new(7, true, &path)).unwrap();
        assert!(wait_until(|| capture.state() == DeviceState::Error));

        capture.stop_capture().unwrap();
        let (header, _) = read_wav(&path);
        assert_eq!(header.data_size, 0);
        assert_eq!(header.riff_size, 36);

        drop(capture);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn activation_failure_is_returned_synchronously() {
        let path = temp_file_path("activation_failure.wav");
        fs::remove_file(&path).ok();
        let backend = FakeBackend::new();
        let denied = CaptureError::platform("ActivateAudioInterfaceAsync", 0x8007_0005u32 as i32);
        backend.set_activation(ActivationBehavior::Fail(denied.clone()));

        let capture = LoopbackCapture::new(backend.clone());
        let err = capture.start_capture(CaptureConfiguration::new(7, true, &path)).unwrap_err();
        assert_eq!(err, denied);
        assert_eq!(capture.state(), DeviceState::Error);
        assert!(!path.exists());

        // Stop from Error reaches Stopped, after which a retry can succeed.
        capture.stop_capture().unwrap();
        assert_eq!(capture.state(), DeviceState::Stopped);
        assert_eq!(capture.recording(), None);

        backend.set_activation(ActivationBehavior::Succeed);
        capture.start_capture(CaptureConfiguration::new(7, true, &path)).unwrap();
        assert!(wait_until(|| capture.state() == DeviceState::Capturing));
        capture.stop_capture().unwrap();

        drop(capture);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn dropped_activation_does_not_hang_start() {
        let backend = FakeBackend::new();
        backend.set_activation(ActivationBehavior::Drop);

        let capture = LoopbackCapture::new(backend);
        let err = capture
            .start_capture(CaptureConfiguration::new(7, true, temp_file_path("dropped.wav")))
            .unwrap_err();
        assert!(matches!(err, CaptureError::ActivationFailed(_)));
    }

    #[test]
    fn restart_after_stop_records_a_fresh_file() {
        let first_path = temp_file_path("restart_first.wav");
        let second_path = temp_file_path("restart_second.wav");
        let backend = FakeBackend::new();
        let capture = start(&backend, CaptureConfiguration::new(7, true, &first_path));
        deliver_and_wait(&capture, &backend, 100, 1);
        capture.stop_capture().unwrap();

        capture.start_capture(CaptureConfiguration::new(7, true, &second_path)).unwrap();
        assert!(wait_until(|| capture.state() == DeviceState::Capturing));
        assert_eq!(capture.stats(), CaptureStats::default());
        deliver_and_wait(&capture, &backend, 25, 2);
        capture.stop_capture().unwrap();

        assert_eq!(read_wav(&first_path).0.data_size, 400);
        assert_eq!(read_wav(&second_path).0.data_size, 100);
        assert_eq!(backend.capture().starts(), 2);

        drop(capture);
        fs::remove_file(&first_path).ok();
        fs::remove_file(&second_path).ok();
    }

    #[test]
    fn stop_while_packets_keep_arriving() {
        let path = temp_file_path("racing.wav");
        let backend = FakeBackend::new();
        let capture = Arc::new(start(&backend, CaptureConfiguration::new(7, false, &path)));

        let producer = {
            let backend = backend.clone();
            let capture = Arc::clone(&capture);
            thread::spawn(move || {
                let mut fill = 0u8;
                while capture.state() == DeviceState::Capturing {
                    backend.deliver(17, fill);
                    fill = fill.wrapping_add(1);
                    thread::sleep(Duration::from_micros(200));
                }
            })
        };

        assert!(wait_until(|| capture.stats().packets_drained >= 5));
        capture.stop_capture().unwrap();
        producer.join().unwrap();

        let (header, body) = read_wav(&path);
        let stats = capture.stats();
        assert_eq!(header.data_size as usize, body.len());
        assert_eq!(u64::from(header.data_size), stats.frames_captured * 4);
        assert_eq!(capture.recording().unwrap().data_bytes, header.data_size);

        drop(capture);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn finalize_failure_still_reaches_stopped() {
        let path = temp_file_path("finalize_failure.wav");
        let backend = FakeBackend::new();
        let capture = start(&backend, CaptureConfiguration::new(7, true, &path));
        deliver_and_wait(&capture, &backend, 100, 3);

        // the checksum pass reopens the file by path
        fs::remove_file(&path).unwrap();

        let err = capture.stop_capture().unwrap_err();
        assert!(matches!(err, CaptureError::StorageError(_)));
        assert_eq!(capture.state(), DeviceState::Stopped);
        assert_eq!(capture.last_error(), Some(err));
        assert_eq!(capture.recording(), None);
        assert!(capture.wait_stopped(Duration::from_millis(10)));

        let second = capture.stop_capture().unwrap_err();
        assert_eq!(second, CaptureError::InvalidState(DeviceState::Stopped));
    }

    /// Swap the recording for a FIFO: the checksum pass blocks opening it
    /// until [`release_finalize`] shows up as a writer.
    #[cfg(unix)]
    fn block_finalize(path: &Path) {
        fs::remove_file(path).unwrap();
        let status = std::process::Command::new("mkfifo").arg(path).status().unwrap();
        assert!(status.success());
    }

    #[cfg(unix)]
    fn release_finalize(path: &Path) {
        use std::io::Write;
        let mut fifo = fs::OpenOptions::new().write(true).open(path).unwrap();
        fifo.write_all(b"pcm").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn accessors_stay_responsive_while_finalizing() {
        use std::sync::mpsc;

        let path = temp_file_path("slow_finalize.wav");
        let backend = FakeBackend::new();
        let capture = Arc::new(start(&backend, CaptureConfiguration::new(7, true, &path)));
        deliver_and_wait(&capture, &backend, 100, 3);
        block_finalize(&path);

        let stopper = {
            let capture = Arc::clone(&capture);
            thread::spawn(move || capture.stop_capture())
        };
        assert!(wait_until(|| capture.state() == DeviceState::Stopping));
        thread::sleep(Duration::from_millis(50));

        let (tx, rx) = mpsc::channel();
        let reader = {
            let capture = Arc::clone(&capture);
            thread::spawn(move || {
                let _ = tx.send((capture.state(), capture.stats()));
            })
        };
        let observed = rx.recv_timeout(Duration::from_secs(2));

        release_finalize(&path);
        stopper.join().unwrap().unwrap();
        reader.join().unwrap();

        let (state, stats) = observed.expect("state() blocked during finalize");
        assert_eq!(state, DeviceState::Stopping);
        assert_eq!(stats.frames_captured, 100);
        assert_eq!(capture.state(), DeviceState::Stopped);
        assert_eq!(capture.recording().unwrap().data_bytes, 400);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn run_for_stops_after_the_duration() {
        let path = temp_file_path("run_for.wav");
        let backend = FakeBackend::new();
        let capture = start(&backend, CaptureConfiguration::new(7, true, &path));
        deliver_and_wait(&capture, &backend, 100, 1);

        capture.run_for(Duration::from_millis(20)).unwrap();
        assert_eq!(capture.state(), DeviceState::Stopped);
        assert_eq!(read_wav(&path).0.data_size, 400);

        drop(capture);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn run_for_accepts_an_earlier_automatic_stop() {
        let path = temp_file_path("run_for_full.wav");
        let backend = FakeBackend::new();
        let mut config = CaptureConfiguration::new(7, true, &path);
        config.max_data_bytes = Some(400);
        let capture = start(&backend, config);
        deliver_and_wait(&capture, &backend, 100, 1);
        backend.deliver(1, 2);

        capture.run_for(Duration::from_secs(5)).unwrap();
        assert_eq!(capture.state(), DeviceState::Stopped);
        assert_eq!(capture.last_error(), None);

        drop(capture);
        fs::remove_file(&path).ok();
    }

    #[cfg(unix)]
    #[test]
    fn run_for_waits_out_a_stop_already_in_progress() {
        let path = temp_file_path("run_for_stopping.wav");
        let backend = FakeBackend::new();
        let capture = Arc::new(start(&backend, CaptureConfiguration::new(7, true, &path)));
        deliver_and_wait(&capture, &backend, 100, 1);
        block_finalize(&path);

        let stopper = {
            let capture = Arc::clone(&capture);
            thread::spawn(move || capture.stop_capture())
        };
        assert!(wait_until(|| capture.state() == DeviceState::Stopping));

        let runner = {
            let capture = Arc::clone(&capture);
            thread::spawn(move || capture.run_for(Duration::ZERO))
        };
        thread::sleep(Duration::from_millis(50));
        release_finalize(&path);

        stopper.join().unwrap().unwrap();
        runner.join().unwrap().unwrap();
        assert_eq!(capture.state(), DeviceState::Stopped);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn full_render_buffer_drops_frames_but_not_file_data() {
        let path = temp_file_path("render_full.wav");
        let backend = FakeBackend::new();
        backend.render().set_padding(FakeBackend::RENDER_CAPACITY - 30);
        let capture = start(&backend, CaptureConfiguration::new(7, true, &path));

        deliver_and_wait(&capture, &backend, 100, 6);
        let stats = capture.stats();
        assert_eq!(stats.frames_monitored, 30);
        assert_eq!(stats.frames_dropped, 70);

        capture.stop_capture().unwrap();
        assert_eq!(read_wav(&path).0.data_size, 400);

        drop(capture);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn monitoring_disabled_opens_no_render_device() {
        let path = temp_file_path("no_monitor.wav");
        let backend = FakeBackend::new();
        let mut config = CaptureConfiguration::new(7, true, &path);
        config.enable_monitoring = false;
        let capture = start(&backend, config);

        deliver_and_wait(&capture, &backend, 100, 1);
        capture.stop_capture().unwrap();

        assert_eq!(backend.render_opens(), 0);
        assert_eq!(capture.stats().frames_monitored, 0);
        assert_eq!(read_wav(&path).0.data_size, 400);

        drop(capture);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn packet_flags_are_counted() {
        let path = temp_file_path("flags.wav");
        let backend = FakeBackend::new();
        let capture = start(&backend, CaptureConfiguration::new(7, true, &path));

        backend.deliver_with_flags(
            10,
            PacketFlags {
                silent: true,
                ..Default::default()
            },
        );
        backend.deliver_with_flags(
            10,
            PacketFlags {
                discontinuity: true,
                ..Default::default()
            },
        );
        backend.deliver_with_flags(
            10,
            PacketFlags {
                timestamp_error: true,
                ..Default::default()
            },
        );
        assert!(wait_until(|| capture.stats().packets_drained == 3));

        let stats = capture.stats();
        assert_eq!(stats.silent_packets, 1);
        assert_eq!(stats.discontinuities, 1);
        assert_eq!(stats.timestamp_errors, 1);

        capture.stop_capture().unwrap();
        drop(capture);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn drop_while_capturing_finalizes_the_file() {
        let path = temp_file_path("drop.wav");
        let backend = FakeBackend::new();
        let capture = start(&backend, CaptureConfiguration::new(7, true, &path));
        deliver_and_wait(&capture, &backend, 100, 8);

        drop(capture);

        let (header, body) = read_wav(&path);
        assert_eq!(header.data_size, 400);
        assert_eq!(body, vec![8u8; 400]);
        assert!(!backend.capture().is_running());

        fs::remove_file(&path).ok();
    }

    #[test]
    fn worker_threads_enter_backend_context() {
        let path = temp_file_path("thread_init.wav");
        let backend = FakeBackend::new();
        let mut config = CaptureConfiguration::new(7, true, &path);
        config.worker_threads = 3;
        let capture = start(&backend, config);

        // three workers plus the waiter
        assert!(wait_until(|| backend.worker_inits() == 4));

        capture.stop_capture().unwrap();
        drop(capture);
        fs::remove_file(&path).ok();
    }
}

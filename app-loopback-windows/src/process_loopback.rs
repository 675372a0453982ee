//! Process loopback activation through `ActivateAudioInterfaceAsync`.
//!
//! The virtual process loopback device is activated with a blob describing
//! the target process and whether its tree is included or excluded. The
//! audio engine reports back on one of its MTA threads; the completion
//! handler finishes initialization there and hands the stream to the
//! waiting caller.

use std::sync::Arc;

use parking_lot::Mutex;
use windows::core::{IUnknown, Interface, HRESULT};
use windows::Win32::Media::Audio::{
    ActivateAudioInterfaceAsync, IActivateAudioInterfaceAsyncOperation, IActivateAudioInterfaceCompletionHandler,
    IActivateAudioInterfaceCompletionHandler_Impl, IAudioCaptureClient, IAudioClient, AUDCLNT_SHAREMODE_SHARED,
    AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM, AUDCLNT_STREAMFLAGS_EVENTCALLBACK, AUDCLNT_STREAMFLAGS_LOOPBACK,
    AUDIOCLIENT_ACTIVATION_PARAMS, AUDIOCLIENT_ACTIVATION_PARAMS_0, AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK,
    AUDIOCLIENT_PROCESS_LOOPBACK_PARAMS, PROCESS_LOOPBACK_MODE, PROCESS_LOOPBACK_MODE_EXCLUDE_TARGET_PROCESS_TREE,
    PROCESS_LOOPBACK_MODE_INCLUDE_TARGET_PROCESS_TREE, VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK,
};
use windows::Win32::System::Variant::VT_BLOB;
use windows_core::implement;

use app_loopback_core::models::config::LoopbackMode;
use app_loopback_core::models::error::CaptureError;
use app_loopback_core::models::format::CaptureFormat;
use app_loopback_core::session::activation::{ActivatedCapture, ActivationCompletion, ActivationRequest};
use app_loopback_core::traits::loopback_backend::{LoopbackBackend, ThreadGuard};

use crate::capture_endpoint::WasapiCaptureEndpoint;
use crate::com::{ComApartment, PlatformResultExt};
use crate::event::Win32Event;
use crate::render_device::WasapiRenderDevice;
use crate::wave_format::{reference_time, to_wave_format};

/// WASAPI backend: process loopback capture plus the default render
/// endpoint for monitoring.
///
/// Requires Windows 10 build 20348 or later.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLoopbackBackend;

impl ProcessLoopbackBackend {
    pub fn new() -> Self {
        Self
    }
}

impl LoopbackBackend for ProcessLoopbackBackend {
    type Capture = WasapiCaptureEndpoint;
    type Render = WasapiRenderDevice;

    fn begin_activation(
        &self,
        request: ActivationRequest,
        completion: ActivationCompletion<Self::Capture>,
    ) -> Result<(), CaptureError> {
        let handler: IActivateAudioInterfaceCompletionHandler = ActivationHandler {
            request,
            completion: Mutex::new(Some(completion)),
        }
        .into();

        let mut params = AUDIOCLIENT_ACTIVATION_PARAMS {
            ActivationType: AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK,
            Anonymous: AUDIOCLIENT_ACTIVATION_PARAMS_0 {
                ProcessLoopbackParams: AUDIOCLIENT_PROCESS_LOOPBACK_PARAMS {
                    TargetProcessId: request.process_id,
                    ProcessLoopbackMode: loopback_mode(request.mode),
                },
            },
        };

        // VT_BLOB pointing at the params; both stay alive for the call,
        // which copies them.
        let prop = windows_core::imp::PROPVARIANT {
            Anonymous: windows_core::imp::PROPVARIANT_0 {
                Anonymous: windows_core::imp::PROPVARIANT_0_0 {
                    vt: VT_BLOB.0,
                    wReserved1: 0,
                    wReserved2: 0,
                    wReserved3: 0,
                    Anonymous: windows_core::imp::PROPVARIANT_0_0_0 {
                        blob: windows_core::imp::BLOB {
                            cbSize: std::mem::size_of::<AUDIOCLIENT_ACTIVATION_PARAMS>() as u32,
                            pBlobData: (&mut params as *mut AUDIOCLIENT_ACTIVATION_PARAMS).cast::<u8>(),
                        },
                    },
                },
            },
        };
        let prop_ptr = (&prop as *const windows_core::imp::PROPVARIANT).cast::<windows_core::PROPVARIANT>();

        unsafe {
            ActivateAudioInterfaceAsync(
                VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK,
                &IAudioClient::IID,
                Some(prop_ptr),
                &handler,
            )
        }
        .platform("ActivateAudioInterfaceAsync")?;

        Ok(())
    }

    fn open_render_device(&self) -> Result<Self::Render, CaptureError> {
        WasapiRenderDevice::open_default()
    }

    fn enter_worker_thread(&self) -> Option<ThreadGuard> {
        match ComApartment::enter_mta() {
            Ok(apartment) => Some(Box::new(apartment)),
            Err(e) => {
                log::warn!("Worker thread runs without COM: {}", e);
                None
            }
        }
    }
}

fn loopback_mode(mode: LoopbackMode) -> PROCESS_LOOPBACK_MODE {
    match mode {
        LoopbackMode::IncludeTargetProcessTree => PROCESS_LOOPBACK_MODE_INCLUDE_TARGET_PROCESS_TREE,
        LoopbackMode::ExcludeTargetProcessTree => PROCESS_LOOPBACK_MODE_EXCLUDE_TARGET_PROCESS_TREE,
    }
}

#[implement(IActivateAudioInterfaceCompletionHandler)]
struct ActivationHandler {
    request: ActivationRequest,
    completion: Mutex<Option<ActivationCompletion<WasapiCaptureEndpoint>>>,
}

impl IActivateAudioInterfaceCompletionHandler_Impl for ActivationHandler_Impl {
    fn ActivateCompleted(&self, operation: Option<&IActivateAudioInterfaceAsyncOperation>) -> windows::core::Result<()> {
        let result = finish_activation(operation, &self.request);
        if let Err(e) = &result {
            log::error!("Process loopback activation failed: {}", e);
        }
        if let Some(completion) = self.completion.lock().take() {
            completion.complete(result);
        }
        Ok(())
    }
}

/// Runs on the audio engine's completion thread.
fn finish_activation(
    operation: Option<&IActivateAudioInterfaceAsyncOperation>,
    request: &ActivationRequest,
) -> Result<ActivatedCapture<WasapiCaptureEndpoint>, CaptureError> {
    let operation =
        operation.ok_or_else(|| CaptureError::ActivationFailed("completion carried no operation".into()))?;

    let mut activate_result = HRESULT(0);
    let mut interface: Option<IUnknown> = None;
    unsafe { operation.GetActivateResult(&mut activate_result, &mut interface) }
        .platform("IActivateAudioInterfaceAsyncOperation::GetActivateResult")?;
    activate_result.ok().platform("ActivateAudioInterfaceAsync")?;

    let audio_client: IAudioClient = interface
        .ok_or_else(|| CaptureError::ActivationFailed("activation returned no interface".into()))?
        .cast()
        .platform("QueryInterface(IAudioClient)")?;

    let format = CaptureFormat::canonical();
    let wave_format = to_wave_format(&format);
    unsafe {
        audio_client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_LOOPBACK | AUDCLNT_STREAMFLAGS_EVENTCALLBACK | AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM,
            reference_time(request.buffer_duration),
            0,
            &wave_format,
            None,
        )
    }
    .platform("IAudioClient::Initialize (loopback)")?;

    let capture_client: IAudioCaptureClient =
        unsafe { audio_client.GetService() }.platform("IAudioClient::GetService")?;

    let event = Win32Event::new()?;
    unsafe { audio_client.SetEventHandle(event.handle()) }.platform("IAudioClient::SetEventHandle")?;

    Ok(ActivatedCapture {
        format,
        endpoint: WasapiCaptureEndpoint::new(audio_client, capture_client, format),
        ready_signal: Arc::new(event),
    })
}

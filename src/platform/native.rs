use super::{select_device, CameraBackend, MediaStream, StreamConstraints};
use crate::errors::{AcquireError, StreamError};
use crate::permissions::{check_permission, classify_access_error, PermissionStatus};
use crate::scanner::SessionRegistry;
use crate::types::{DeviceInfo, Frame, StreamCapabilities};
use futures::future::BoxFuture;
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat,
        RequestedFormatType, Resolution,
    },
    CallbackCamera,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Host-wide registry; every `NokhwaBackend` drives the same cameras.
static HOST_SESSIONS: OnceLock<Arc<SessionRegistry>> = OnceLock::new();

/// Camera backend on top of nokhwa's native capture APIs.
///
/// Desktop cameras carry no facing metadata, so facing constraints are
/// resolved from device labels. No nokhwa backend exposes a torch.
/// All instances share one process-wide [`SessionRegistry`].
#[derive(Debug, Default, Clone)]
pub struct NokhwaBackend;

impl NokhwaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CameraBackend for NokhwaBackend {
    fn name(&self) -> &str {
        "nokhwa"
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, AcquireError> {
        let cameras = query(ApiBackend::Auto)
            .map_err(|e| classify_access_error(format!("Failed to query cameras: {}", e)))?;

        Ok(cameras
            .into_iter()
            .map(|info| {
                DeviceInfo::new(info.index().to_string(), info.human_name())
                    .with_description(info.description().to_string())
            })
            .collect())
    }

    fn acquire<'a>(
        &'a self,
        constraints: &'a StreamConstraints,
    ) -> BoxFuture<'a, Result<Arc<dyn MediaStream>, AcquireError>> {
        Box::pin(async move {
            let devices = self.enumerate()?;
            let device = select_device(&devices, constraints)?.clone();
            let constraints = constraints.clone();

            let stream = tokio::task::spawn_blocking(move || open_stream(device, &constraints))
                .await
                .map_err(|e| AcquireError::Backend(format!("Task join error: {}", e)))??;

            Ok(Arc::new(stream) as Arc<dyn MediaStream>)
        })
    }

    fn permission(&self) -> PermissionStatus {
        check_permission()
    }

    fn sessions(&self) -> Arc<SessionRegistry> {
        HOST_SESSIONS
            .get_or_init(|| Arc::new(SessionRegistry::new()))
            .clone()
    }
}

fn camera_index(device_id: &str) -> CameraIndex {
    match device_id.parse::<u32>() {
        Ok(index) => CameraIndex::Index(index),
        Err(_) => CameraIndex::String(device_id.to_string()),
    }
}

fn open_stream(
    device: DeviceInfo,
    constraints: &StreamConstraints,
) -> Result<NokhwaStream, AcquireError> {
    let requested = match constraints.ideal_resolution {
        Some((width, height)) => RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, 30),
        )),
        None => RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    };

    let latest: Arc<Mutex<Option<Arc<Frame>>>> = Arc::new(Mutex::new(None));
    let sequence = Arc::new(AtomicU64::new(0));

    let sink = latest.clone();
    let mut camera = CallbackCamera::new(camera_index(&device.id), requested, move |buffer| {
        match buffer.decode_image::<RgbFormat>() {
            Ok(image) => {
                let seq = sequence.fetch_add(1, Ordering::Relaxed) + 1;
                let (width, height) = (image.width(), image.height());
                let frame = Frame::new(seq, width, height, image.into_raw());
                *crate::lock_unpoisoned(&sink) = Some(Arc::new(frame));
            }
            Err(e) => log::trace!("Dropping undecodable frame: {}", e),
        }
    })
    .map_err(|e| classify_access_error(format!("Failed to initialize camera: {}", e)))?;

    camera
        .open_stream()
        .map_err(|e| classify_access_error(format!("Failed to start stream: {}", e)))?;

    log::info!("Opened camera {} ({})", device.label, device.id);

    Ok(NokhwaStream {
        label: device.label,
        requested: constraints.ideal_resolution,
        camera: Mutex::new(Some(camera)),
        latest,
        live: AtomicBool::new(true),
    })
}

/// Open nokhwa stream; frames arrive on nokhwa's capture thread.
pub struct NokhwaStream {
    label: String,
    requested: Option<(u32, u32)>,
    camera: Mutex<Option<CallbackCamera>>,
    latest: Arc<Mutex<Option<Arc<Frame>>>>,
    live: AtomicBool,
}

impl MediaStream for NokhwaStream {
    fn label(&self) -> &str {
        &self.label
    }

    fn capabilities(&self) -> StreamCapabilities {
        let delivered = crate::lock_unpoisoned(&self.latest)
            .as_ref()
            .map(|frame| (frame.width, frame.height));
        StreamCapabilities {
            torch: false,
            resolution: delivered.or(self.requested),
            min_resolution: None,
            max_resolution: None,
        }
    }

    fn latest_frame(&self) -> Option<Arc<Frame>> {
        if !self.live.load(Ordering::Acquire) {
            return None;
        }
        crate::lock_unpoisoned(&self.latest).clone()
    }

    fn set_torch(&self, _on: bool) -> Result<(), StreamError> {
        Err(StreamError::Unsupported(
            "nokhwa exposes no torch control".to_string(),
        ))
    }

    fn stop(&self) {
        self.live.store(false, Ordering::Release);
        if let Some(mut camera) = crate::lock_unpoisoned(&self.camera).take() {
            if let Err(e) = camera.stop_stream() {
                log::warn!("Failed to stop camera {}: {}", self.label, e);
            }
        }
        *crate::lock_unpoisoned(&self.latest) = None;
    }

    fn is_live(&self) -> bool {
        if !self.live.load(Ordering::Acquire) {
            return false;
        }
        crate::lock_unpoisoned(&self.camera)
            .as_ref()
            .map(|camera| camera.is_stream_open())
            .unwrap_or(false)
    }
}

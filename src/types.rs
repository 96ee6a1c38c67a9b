use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Which way a camera points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    Front,
    Back,
    Unknown,
}

impl FacingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacingMode::Front => "front",
            FacingMode::Back => "back",
            FacingMode::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FacingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw device entry as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub description: String,
    /// Explicit facing metadata, when the platform provides it.
    pub facing: Option<FacingMode>,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: String::new(),
            facing: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_facing(mut self, facing: FacingMode) -> Self {
        self.facing = Some(facing);
        self
    }
}

/// Device entry after the probe has guessed its facing mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub id: String,
    pub label: String,
    pub facing: FacingMode,
}

/// Features reported by an open stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCapabilities {
    pub torch: bool,
    /// Resolution actually delivered, when known.
    pub resolution: Option<(u32, u32)>,
    pub min_resolution: Option<(u32, u32)>,
    pub max_resolution: Option<(u32, u32)>,
}

/// Torch (flash) state of the current stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TorchState {
    On,
    #[default]
    Off,
}

impl TorchState {
    pub fn toggled(self) -> Self {
        match self {
            TorchState::On => TorchState::Off,
            TorchState::Off => TorchState::On,
        }
    }

    pub fn is_on(self) -> bool {
        self == TorchState::On
    }
}

/// One RGB8 video frame.
///
/// Frame data is reference counted so every engine can look at the same
/// live frame without copying it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGB8 pixels, `width * height * 3` bytes.
    pub data: Bytes,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(sequence: u64, width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            width,
            height,
            data: data.into(),
            captured_at: Instant::now(),
        }
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }

    /// Copy the frame into an owned `RgbImage`, or `None` if the buffer size is wrong.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        if !self.is_valid() {
            return None;
        }
        RgbImage::from_raw(self.width, self.height, self.data.to_vec())
    }
}

/// The decoder engine variants, in their default priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    Native,
    GeneralPurpose,
    Specialized,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Native => "native",
            EngineKind::GeneralPurpose => "general-purpose",
            EngineKind::Specialized => "specialized",
        }
    }

    pub fn all() -> [EngineKind; 3] {
        [
            EngineKind::Native,
            EngineKind::GeneralPurpose,
            EngineKind::Specialized,
        ]
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single decode attempt on one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    NoMatch,
    Match(String),
    TransientError(String),
}

impl DetectionOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, DetectionOutcome::Match(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionAttempt {
    pub engine: EngineKind,
    pub frame_timestamp: Instant,
    pub frame_sequence: u64,
    pub outcome: DetectionOutcome,
}

/// A decoded payload that passed the result gate.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub payload: String,
    pub source_engine: EngineKind,
    #[serde(skip)]
    pub accepted_at: Instant,
    pub detected_at: DateTime<Utc>,
    pub frame_sequence: u64,
}

impl ScanResult {
    pub fn new(payload: String, source_engine: EngineKind, accepted_at: Instant) -> Self {
        Self {
            payload,
            source_engine,
            accepted_at,
            detected_at: Utc::now(),
            frame_sequence: 0,
        }
    }

    pub fn with_frame_sequence(mut self, sequence: u64) -> Self {
        self.frame_sequence = sequence;
        self
    }
}

/// Per-engine bookkeeping kept by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyState {
    pub engine: EngineKind,
    pub enabled: bool,
    pub last_attempt_at: Option<Instant>,
    pub consecutive_failures: u32,
    pub consecutive_overruns: u32,
    pub attempts: u64,
    pub misses: u64,
}

impl StrategyState {
    pub fn new(engine: EngineKind) -> Self {
        Self {
            engine,
            enabled: true,
            last_attempt_at: None,
            consecutive_failures: 0,
            consecutive_overruns: 0,
            attempts: 0,
            misses: 0,
        }
    }
}

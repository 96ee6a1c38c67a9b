//! Snapshot rendering for raster-based engines
//!
//! Engines that cannot work on the live stream take a still copy of the
//! latest frame first. A preset decides how that copy is rendered: scaled,
//! contrast and brightness adjusted, optionally desaturated before the
//! adjustment. The output is always a luma raster since every raster engine
//! decodes on intensity only.

use crate::types::Frame;
use image::{imageops, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

/// Rendering recipe for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancePreset {
    pub name: String,
    /// Scale factor applied to the frame before clamping to the max dimension
    pub scale: f32,
    /// Contrast multiplier around mid-grey (1.0 leaves the image unchanged)
    pub contrast: f32,
    /// Brightness multiplier (1.0 leaves the image unchanged)
    pub brightness: f32,
    /// Convert to grey before adjusting instead of adjusting each channel
    pub grayscale: bool,
}

impl EnhancePreset {
    pub fn standard() -> Self {
        Self {
            name: "standard".to_string(),
            scale: 1.0,
            contrast: 1.0,
            brightness: 1.0,
            grayscale: false,
        }
    }

    pub fn high_contrast() -> Self {
        Self {
            name: "high-contrast".to_string(),
            scale: 2.0,
            contrast: 2.0,
            brightness: 1.2,
            grayscale: false,
        }
    }

    pub fn grayscale() -> Self {
        Self {
            name: "grayscale".to_string(),
            scale: 1.5,
            contrast: 1.5,
            brightness: 1.1,
            grayscale: true,
        }
    }

    /// Last resort for washed-out or very small codes.
    pub fn ultra_contrast() -> Self {
        Self {
            name: "ultra-contrast".to_string(),
            scale: 3.0,
            contrast: 3.0,
            brightness: 1.5,
            grayscale: false,
        }
    }

    /// Brightened render for dim scenes. Saturation has no effect on luma.
    pub fn enhanced() -> Self {
        Self {
            name: "enhanced".to_string(),
            scale: 1.0,
            contrast: 1.2,
            brightness: 1.5,
            grayscale: false,
        }
    }

    /// Preset order used by the general-purpose engine.
    pub fn defaults() -> Vec<Self> {
        vec![Self::standard(), Self::high_contrast(), Self::grayscale()]
    }

    /// The defaults followed by the slower optional presets.
    pub fn extended() -> Vec<Self> {
        let mut presets = Self::defaults();
        presets.extend([Self::ultra_contrast(), Self::enhanced()]);
        presets
    }

    /// Look up a built-in preset by its name.
    pub fn named(name: &str) -> Option<Self> {
        Self::extended().into_iter().find(|preset| preset.name == name)
    }

    fn is_identity(&self) -> bool {
        self.contrast == 1.0 && self.brightness == 1.0
    }

    fn lookup_table(&self) -> [u8; 256] {
        let mut lut = [0u8; 256];
        for (value, slot) in lut.iter_mut().enumerate() {
            let contrasted = (value as f32 - 128.0) * self.contrast + 128.0;
            *slot = (contrasted * self.brightness).round().clamp(0.0, 255.0) as u8;
        }
        lut
    }
}

/// Output size for `preset`, keeping the aspect ratio and the longest side
/// within `max_dimension`.
pub fn target_size(width: u32, height: u32, scale: f32, max_dimension: u32) -> (u32, u32) {
    let mut w = (width as f32 * scale).round().max(1.0);
    let mut h = (height as f32 * scale).round().max(1.0);

    let longest = w.max(h);
    if longest > max_dimension as f32 {
        let shrink = max_dimension as f32 / longest;
        w = (w * shrink).round().max(1.0);
        h = (h * shrink).round().max(1.0);
    }

    (w as u32, h as u32)
}

/// Render `frame` through `preset`. `None` if the frame buffer is malformed.
pub fn render(frame: &Frame, preset: &EnhancePreset, max_dimension: u32) -> Option<GrayImage> {
    let rgb = frame.to_rgb_image()?;
    let (width, height) = target_size(rgb.width(), rgb.height(), preset.scale, max_dimension);

    let resized: RgbImage = if (width, height) == rgb.dimensions() {
        rgb
    } else {
        imageops::resize(&rgb, width, height, imageops::FilterType::Triangle)
    };

    if preset.is_identity() {
        return Some(imageops::grayscale(&resized));
    }

    let lut = preset.lookup_table();
    if preset.grayscale {
        let mut luma = imageops::grayscale(&resized);
        for pixel in luma.pixels_mut() {
            pixel.0[0] = lut[pixel.0[0] as usize];
        }
        Some(luma)
    } else {
        let mut adjusted = resized;
        for pixel in adjusted.pixels_mut() {
            for channel in pixel.0.iter_mut() {
                *channel = lut[*channel as usize];
            }
        }
        Some(imageops::grayscale(&adjusted))
    }
}

/// Luma copy of a frame at its native size.
pub fn luma(frame: &Frame) -> Option<GrayImage> {
    let rgb = frame.to_rgb_image()?;
    Some(imageops::grayscale(&rgb))
}

//! Synthetic frames and device lists
//!
//! Lets every part of the pipeline run offline: frames shaped like a real
//! capture, and device lists shaped like what common hosts enumerate.

use crate::types::{DeviceInfo, FacingMode, Frame};

/// RGB8 frame with a gradient that shifts with `sequence`.
///
/// Contains no code, so every engine should miss on it.
pub fn synthetic_frame(sequence: u64, width: u32, height: u32) -> Frame {
    let mut data = vec![0u8; (width * height * 3) as usize];

    let base = (sequence % 256) as u8;
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }

    Frame::new(sequence, width, height, data)
}

/// RGB8 frame showing `payload` encoded as `format`, dark on light, with a
/// `margin` pixel white border around the writer's output.
#[cfg(feature = "general-purpose")]
pub fn encoded_frame(
    sequence: u64,
    format: rxing::BarcodeFormat,
    payload: &str,
    size: (u32, u32),
    margin: u32,
) -> Result<Frame, rxing::Exceptions> {
    use rxing::Writer;

    let matrix =
        rxing::MultiFormatWriter::default().encode(payload, &format, size.0 as i32, size.1 as i32)?;
    let (code_width, code_height) = (matrix.width(), matrix.height());
    let width = code_width + margin * 2;
    let height = code_height + margin * 2;

    let mut data = vec![255u8; (width * height * 3) as usize];
    for y in 0..code_height {
        for x in 0..code_width {
            if matrix.get(x, y) {
                let idx = (((y + margin) * width + x + margin) * 3) as usize;
                data[idx..idx + 3].fill(0);
            }
        }
    }

    Ok(Frame::new(sequence, width, height, data))
}

/// A phone: labelled back and front cameras with facing metadata.
pub fn phone_devices() -> Vec<DeviceInfo> {
    vec![
        DeviceInfo::new("0", "camera2 0, facing back").with_facing(FacingMode::Back),
        DeviceInfo::new("1", "camera2 1, facing front").with_facing(FacingMode::Front),
    ]
}

/// A laptop: one built-in front camera, no facing metadata.
pub fn laptop_devices() -> Vec<DeviceInfo> {
    vec![DeviceInfo::new("0", "Integrated Webcam").with_description("UVC built-in")]
}

/// A desktop with a single USB camera whose facing cannot be guessed.
pub fn desktop_devices() -> Vec<DeviceInfo> {
    vec![DeviceInfo::new("0", "HD Pro Webcam C920").with_description("USB")]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::describe;

    #[test]
    fn test_synthetic_frame_correct_size() {
        let frame = synthetic_frame(0, 320, 240);
        assert_eq!(frame.width, 320);
        assert_eq!(frame.height, 240);
        assert!(frame.is_valid());
    }

    #[test]
    fn test_synthetic_frames_differ() {
        let frame0 = synthetic_frame(0, 32, 24);
        let frame1 = synthetic_frame(1, 32, 24);
        assert_ne!(frame0.data[0], frame1.data[0]);
        assert_eq!(frame1.sequence, 1);
    }

    #[test]
    fn test_device_profiles_facing() {
        let phone: Vec<FacingMode> = phone_devices().iter().map(|d| describe(d).facing).collect();
        assert_eq!(phone, [FacingMode::Back, FacingMode::Front]);
        assert_eq!(describe(&laptop_devices()[0]).facing, FacingMode::Front);
        assert_eq!(describe(&desktop_devices()[0]).facing, FacingMode::Unknown);
    }
}

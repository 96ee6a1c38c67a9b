use crate::errors::AcquireError;

/// Permission status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PermissionStatus {
    /// Permission granted
    Granted,
    /// Permission denied
    Denied,
    /// Permission not determined (user hasn't been asked yet)
    NotDetermined,
    /// Permission restricted (parental controls, etc)
    Restricted,
}

impl PermissionStatus {
    /// Denied and restricted both mean a stream open will be refused.
    pub fn blocks_access(&self) -> bool {
        matches!(self, PermissionStatus::Denied | PermissionStatus::Restricted)
    }
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionStatus::Granted => write!(f, "granted"),
            PermissionStatus::Denied => write!(f, "denied"),
            PermissionStatus::NotDetermined => write!(f, "not_determined"),
            PermissionStatus::Restricted => write!(f, "restricted"),
        }
    }
}

/// Detailed permission information
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PermissionInfo {
    pub status: PermissionStatus,
    pub message: String,
    pub can_request: bool,
}

/// Check camera permission status for the current platform
pub fn check_permission() -> PermissionStatus {
    check_permission_detailed().status
}

/// Check camera permission status with detailed information
pub fn check_permission_detailed() -> PermissionInfo {
    #[cfg(target_os = "linux")]
    {
        check_permission_linux()
    }

    #[cfg(all(target_os = "windows", feature = "native"))]
    {
        check_permission_windows()
    }

    #[cfg(not(any(target_os = "linux", all(target_os = "windows", feature = "native"))))]
    {
        PermissionInfo {
            status: PermissionStatus::NotDetermined,
            message: "Permission probing not supported on this platform".to_string(),
            can_request: false,
        }
    }
}

#[cfg(all(target_os = "windows", feature = "native"))]
fn check_permission_windows() -> PermissionInfo {
    // Camera access is governed by the Privacy settings; enumeration is the proxy.
    match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
        Ok(devices) if !devices.is_empty() => PermissionInfo {
            status: PermissionStatus::Granted,
            message: "Camera access granted via Windows Privacy settings".to_string(),
            can_request: false,
        },
        Ok(_) => PermissionInfo {
            status: PermissionStatus::NotDetermined,
            message: "No cameras found - permission may not be granted".to_string(),
            can_request: true,
        },
        Err(e) => PermissionInfo {
            status: PermissionStatus::Denied,
            message: format!("Camera access denied: {}", e),
            can_request: true,
        },
    }
}

#[cfg(target_os = "linux")]
fn check_permission_linux() -> PermissionInfo {
    use std::path::Path;

    let video_devices: Vec<String> = (0..10)
        .map(|i| format!("/dev/video{}", i))
        .filter(|path| Path::new(path).exists())
        .collect();

    // metadata() succeeds without read access; only an open proves it.
    let readable = video_devices
        .first()
        .map(|first| std::fs::OpenOptions::new().read(true).open(first).is_ok())
        .unwrap_or(false);

    classify_video_access(&video_devices, readable, check_linux_group_membership())
}

/// Decide the permission status from what was found under `/dev`.
///
/// Split out of the platform check so it can be tested without devices.
pub fn classify_video_access(
    video_devices: &[String],
    readable: bool,
    in_video_group: bool,
) -> PermissionInfo {
    let Some(first_device) = video_devices.first() else {
        return PermissionInfo {
            status: PermissionStatus::NotDetermined,
            message: "No video devices found at /dev/video*".to_string(),
            can_request: false,
        };
    };

    if !readable {
        return PermissionInfo {
            status: PermissionStatus::Denied,
            message: format!("Cannot access {}", first_device),
            can_request: true,
        };
    }

    if in_video_group {
        PermissionInfo {
            status: PermissionStatus::Granted,
            message: format!(
                "Camera access granted (user in video group, {} found)",
                first_device
            ),
            can_request: false,
        }
    } else {
        PermissionInfo {
            status: PermissionStatus::Denied,
            message: format!(
                "Camera device {} exists but user not in video group - run: sudo usermod -a -G video $USER",
                first_device
            ),
            can_request: true,
        }
    }
}

/// OS error texts that mean the open itself was refused for lack of access.
const ACCESS_DENIED_HINTS: &[&str] = &[
    "permission denied",
    "os error 13",
    "eacces",
    "eperm",
    "operation not permitted",
    "access is denied",
    "not authorized",
];

/// Classify a backend failure by its own error text.
///
/// Host-wide guesses such as group membership are not consulted: users with
/// seat ACLs get access without being in the `video` group.
pub fn classify_access_error(message: String) -> AcquireError {
    let lower = message.to_lowercase();
    if ACCESS_DENIED_HINTS.iter().any(|hint| lower.contains(hint)) {
        AcquireError::PermissionDenied(message)
    } else {
        AcquireError::Backend(message)
    }
}

#[cfg(target_os = "linux")]
fn check_linux_group_membership() -> bool {
    use std::process::Command;

    Command::new("groups")
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|groups| groups.contains("video") || groups.contains("plugdev"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_devices_is_not_determined() {
        let info = classify_video_access(&[], false, true);
        assert_eq!(info.status, PermissionStatus::NotDetermined);
        assert!(!info.can_request);
    }

    #[test]
    fn test_group_membership_decides() {
        let devices = vec!["/dev/video0".to_string()];
        assert_eq!(
            classify_video_access(&devices, true, true).status,
            PermissionStatus::Granted
        );
        let denied = classify_video_access(&devices, true, false);
        assert_eq!(denied.status, PermissionStatus::Denied);
        assert!(denied.message.contains("usermod"));
    }

    #[test]
    fn test_unreadable_device_is_denied() {
        let devices = vec!["/dev/video2".to_string()];
        let info = classify_video_access(&devices, false, true);
        assert_eq!(info.status, PermissionStatus::Denied);
        assert!(info.status.blocks_access());
    }

    #[test]
    fn test_access_errors_classified_from_message() {
        let denied = classify_access_error(
            "Failed to initialize camera: Could not open device /dev/video0: Permission denied (os error 13)"
                .to_string(),
        );
        assert!(matches!(denied, AcquireError::PermissionDenied(_)));

        let windows = classify_access_error("Failed to start stream: Access is denied.".to_string());
        assert!(matches!(windows, AcquireError::PermissionDenied(_)));
    }

    #[test]
    fn test_busy_device_is_not_permission_denied() {
        // Whatever the host's group membership, these must stay retryable.
        for message in [
            "Failed to start stream: Device or resource busy (os error 16)",
            "Failed to initialize camera: Cannot find a matching format for 1920x1080",
        ] {
            let error = classify_access_error(message.to_string());
            assert_eq!(error, AcquireError::Backend(message.to_string()));
        }
    }

    #[test]
    fn test_check_permission_is_consistent() {
        let first = check_permission();
        for _ in 0..3 {
            assert_eq!(check_permission(), first);
        }
    }
}

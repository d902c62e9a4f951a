//! Channel discovery and selection.

use std::sync::Arc;

use log::{info, warn};

use crate::error::CaptureError;
use crate::sdk::{CaptureChannel, DeviceProvider, VideoInputType};

/// The two supported device families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFamily {
    /// PCIe cards with kernel-assisted DMA and device notifications.
    Pro,
    /// USB devices with callback-driven delivery.
    Usb,
}

impl DeviceFamily {
    pub fn display_name(self) -> &'static str {
        match self {
            DeviceFamily::Pro => "Pro Capture",
            DeviceFamily::Usb => "USB Capture",
        }
    }

    fn from_family_name(name: &str) -> Option<Self> {
        match name {
            "Pro Capture" => Some(DeviceFamily::Pro),
            "USB Capture" => Some(DeviceFamily::Usb),
            _ => None,
        }
    }
}

/// The channel the filter will capture from.
pub struct SelectedDevice {
    pub family: DeviceFamily,
    pub serial_no: String,
    pub device_path: String,
    pub channel: Arc<dyn CaptureChannel>,
}

impl SelectedDevice {
    /// Description string published through the observer.
    pub fn description(&self) -> String {
        format!("{} [{}]", self.family.display_name(), self.serial_no)
    }
}

/// Walks every channel the SDK reports, keeps the ones exposing an HDMI
/// input, and picks the first one matching `target_path` (or simply the
/// first when no target is configured). Channels that are not selected are
/// closed as soon as they are ruled out.
pub fn select_device(
    provider: &dyn DeviceProvider,
    target_path: Option<&str>,
) -> Result<SelectedDevice, CaptureError> {
    let mut selected: Option<SelectedDevice> = None;

    for index in 0..provider.channel_count() {
        let info = match provider.channel_info(index) {
            Ok(info) => info,
            Err(e) => {
                warn!("channel {} info unreadable, ignoring: {}", index, e);
                continue;
            }
        };

        let family = match DeviceFamily::from_family_name(&info.family_name) {
            Some(family) => family,
            None => {
                warn!(
                    "unrecognised family {} on device {} at {}, ignoring",
                    info.family_name, info.serial_no, info.device_path
                );
                continue;
            }
        };

        let channel = match provider.open_channel(&info.device_path) {
            Ok(channel) => channel,
            Err(e) => {
                warn!(
                    "unable to open channel on {} device {} at {}, ignoring: {}",
                    family.display_name(),
                    info.serial_no,
                    info.device_path,
                    e
                );
                continue;
            }
        };

        let input_types = match channel.video_input_types() {
            Ok(types) => types,
            Err(e) => {
                warn!(
                    "unable to load video input types on {} device {} at {}, ignoring: {}",
                    family.display_name(),
                    info.serial_no,
                    info.device_path,
                    e
                );
                continue; // dropping the handle closes the channel
            }
        };

        if !input_types.contains(&VideoInputType::Hdmi) {
            warn!(
                "no HDMI input available on {} device {} at {}, ignoring",
                family.display_name(),
                info.serial_no,
                info.device_path
            );
            continue;
        }

        let matches_target = match target_path {
            Some(path) => path == info.device_path,
            None => true,
        };

        if selected.is_none() && matches_target {
            info!(
                "filter will use {} device {} at {}",
                family.display_name(),
                info.serial_no,
                info.device_path
            );
            selected = Some(SelectedDevice {
                family,
                serial_no: info.serial_no,
                device_path: info.device_path,
                channel,
            });
        } else {
            info!(
                "ignoring usable {} device {} at {}",
                family.display_name(),
                info.serial_no,
                info.device_path
            );
        }
    }

    match selected {
        Some(device) => Ok(device),
        None => match target_path {
            Some(path) => Err(CaptureError::NoSuchDevice(path.to_string())),
            None => Err(CaptureError::NoDevice),
        },
    }
}

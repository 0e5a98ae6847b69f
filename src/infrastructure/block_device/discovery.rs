//! Physical disk discovery
//!
//! Lists the whole-disk devices of the machine and resolves a
//! [`DeviceId`] to a path that can be opened.

use humansize::{BINARY, format_size};
use serde::Serialize;
use std::path::PathBuf;

use crate::domain::entities::DeviceId;
use crate::domain::repositories::BlockDeviceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    pub index: u32,
    pub name: String,
    pub path: String,
    pub device_type: &'static str,
    pub size_bytes: u64,
}

impl DiscoveredDevice {
    pub fn human_size(&self) -> String {
        format_size(self.size_bytes, BINARY)
    }

    pub fn display(&self) -> String {
        format!(
            "[{}] {} ({}) - {}",
            self.index,
            self.path,
            self.device_type,
            self.human_size()
        )
    }
}

/// Lists whole-disk devices, sorted by name and numbered from zero
#[cfg(target_os = "linux")]
pub fn discover_devices() -> Result<Vec<DiscoveredDevice>, BlockDeviceError> {
    use std::fs;
    use std::path::Path;

    let sys_block = Path::new("/sys/block");
    if !sys_block.exists() {
        return Err(BlockDeviceError::Other(
            "/sys/block not found - is sysfs mounted?".to_string(),
        ));
    }

    let entries = fs::read_dir(sys_block)
        .map_err(|e| BlockDeviceError::Other(format!("Failed to read /sys/block: {e}")))?;

    let mut disks: Vec<DiscoveredDevice> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_virtual_device(&name) {
                return None;
            }
            let sys_path = entry.path();
            // sysfs reports size in 512-byte units regardless of sector size
            let size_bytes = fs::read_to_string(sys_path.join("size"))
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(|sectors| sectors * 512)
                .filter(|&size| size > 0)?;
            Some(DiscoveredDevice {
                index: 0,
                path: format!("/dev/{name}"),
                device_type: detect_device_type(&name, &sys_path),
                name,
                size_bytes,
            })
        })
        .collect();

    disks.sort_by(|a, b| a.name.cmp(&b.name));
    for (index, disk) in disks.iter_mut().enumerate() {
        disk.index = index as u32;
    }
    Ok(disks)
}

/// Probes `\\.\PhysicalDriveN` for the first few drive numbers
#[cfg(windows)]
pub fn discover_devices() -> Result<Vec<DiscoveredDevice>, BlockDeviceError> {
    use super::FileBlockDevice;
    use crate::domain::repositories::BlockDevice;

    let mut disks = Vec::new();
    for index in 0..32u32 {
        let path = format!(r"\\.\PhysicalDrive{index}");
        match FileBlockDevice::open(&path) {
            Ok(device) => disks.push(DiscoveredDevice {
                index,
                name: format!("PhysicalDrive{index}"),
                path,
                device_type: "Disk",
                size_bytes: device.info().size_bytes(),
            }),
            Err(BlockDeviceError::PermissionDenied(_)) => {
                return Err(BlockDeviceError::PermissionDenied(path));
            }
            Err(_) => continue,
        }
    }
    Ok(disks)
}

#[cfg(not(any(target_os = "linux", windows)))]
pub fn discover_devices() -> Result<Vec<DiscoveredDevice>, BlockDeviceError> {
    Ok(Vec::new())
}

/// Turns a device id into an openable path
pub fn resolve_device_path(id: &DeviceId) -> Result<PathBuf, BlockDeviceError> {
    match id {
        DeviceId::Path(path) => Ok(path.clone()),
        #[cfg(windows)]
        DeviceId::Index(index) => Ok(PathBuf::from(format!(r"\\.\PhysicalDrive{index}"))),
        #[cfg(not(windows))]
        DeviceId::Index(index) => discover_devices()?
            .into_iter()
            .find(|d| d.index == *index)
            .map(|d| PathBuf::from(d.path))
            .ok_or_else(|| BlockDeviceError::DeviceNotFound(id.to_string())),
    }
}

#[cfg(target_os = "linux")]
fn is_virtual_device(name: &str) -> bool {
    name.starts_with("loop")
        || name.starts_with("ram")
        || name.starts_with("dm-")
        || name.starts_with("zram")
        || name.starts_with("nbd")
        || name.starts_with("sr")
}

#[cfg(target_os = "linux")]
fn detect_device_type(name: &str, sys_path: &std::path::Path) -> &'static str {
    if name.starts_with("nvme") {
        return "NVMe";
    }
    if name.starts_with("mmcblk") {
        return "SD/MMC";
    }
    match std::fs::read_to_string(sys_path.join("queue/rotational")) {
        Ok(content) if content.trim() == "0" => "SSD",
        Ok(content) if content.trim() == "1" => "HDD",
        _ => "Disk",
    }
}

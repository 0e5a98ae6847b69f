//! Block device implementations

mod discovery;
mod file_block_device;
mod memory_block_device;
mod mmap_block_device;
mod timeout_block_device;

pub use discovery::{DiscoveredDevice, discover_devices, resolve_device_path};
pub use file_block_device::{DEFAULT_SECTOR_SIZE, FileBlockDevice};
pub use memory_block_device::MemoryBlockDevice;
pub use mmap_block_device::MmapBlockDevice;
pub use timeout_block_device::TimeoutBlockDevice;

//! Read timeouts
//!
//! Failing drives can block a read for minutes. This decorator performs
//! reads on a dedicated I/O thread and gives up on a request after a
//! deadline, reporting the first sector of the range as timed out.
//!
//! A thread stuck in a read cannot be interrupted, so a timeout retires
//! it: later reads go to a fresh thread and the stuck one exits once its
//! read returns, skipping any request whose caller already gave up.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::domain::entities::DeviceInfo;
use crate::domain::repositories::{BlockDevice, BlockDeviceError};

struct ReadRequest {
    start: u64,
    count: u64,
    abandoned: Arc<AtomicBool>,
    reply: Sender<Result<Vec<u8>, BlockDeviceError>>,
}

pub struct TimeoutBlockDevice {
    info: DeviceInfo,
    inner: Arc<dyn BlockDevice>,
    requests: Mutex<Sender<ReadRequest>>,
    timeout: Duration,
}

impl TimeoutBlockDevice {
    pub fn new(inner: Arc<dyn BlockDevice>, timeout: Duration) -> Result<Self, BlockDeviceError> {
        let info = inner.info().clone();
        let requests = spawn_io_thread(Arc::clone(&inner))?;
        Ok(Self {
            info,
            inner,
            requests: Mutex::new(requests),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Replaces the I/O thread behind `stuck` unless another caller
    /// already did
    fn retire(&self, stuck: &Sender<ReadRequest>) -> Result<(), BlockDeviceError> {
        let mut requests = self.requests.lock();
        if requests.same_channel(stuck) {
            *requests = spawn_io_thread(Arc::clone(&self.inner))?;
        }
        Ok(())
    }
}

fn spawn_io_thread(inner: Arc<dyn BlockDevice>) -> Result<Sender<ReadRequest>, BlockDeviceError> {
    let (requests, rx) = unbounded::<ReadRequest>();
    thread::Builder::new()
        .name("device-io".to_string())
        .spawn(move || io_thread(inner, rx))
        .map_err(|e| BlockDeviceError::Other(format!("Failed to start I/O thread: {e}")))?;
    Ok(requests)
}

fn io_thread(inner: Arc<dyn BlockDevice>, rx: Receiver<ReadRequest>) {
    for request in rx.iter() {
        if request.abandoned.load(Ordering::Acquire) {
            continue;
        }
        let result = inner.read_sectors(request.start, request.count);
        let _ = request.reply.send(result);
    }
    tracing::trace!("Device I/O thread stopped");
}

impl BlockDevice for TimeoutBlockDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn read_sectors(&self, start: u64, count: u64) -> Result<Vec<u8>, BlockDeviceError> {
        self.check_range(start, count)?;
        let requests = self.requests.lock().clone();
        let abandoned = Arc::new(AtomicBool::new(false));
        let (reply, response) = bounded(1);
        requests
            .send(ReadRequest {
                start,
                count,
                abandoned: Arc::clone(&abandoned),
                reply,
            })
            .map_err(|_| BlockDeviceError::Other("Device I/O thread stopped".to_string()))?;

        match response.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                abandoned.store(true, Ordering::Release);
                tracing::warn!("Read of sector {} timed out after {:?}", start, self.timeout);
                self.retire(&requests)?;
                Err(BlockDeviceError::Timeout(start))
            }
            Err(RecvTimeoutError::Disconnected) => Err(BlockDeviceError::Other(
                "Device I/O thread stopped".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::block_device::MemoryBlockDevice;

    #[test]
    fn test_passes_reads_through() {
        let inner = Arc::new(MemoryBlockDevice::new(vec![7u8; 2048], 512));
        let device = TimeoutBlockDevice::new(inner, Duration::from_secs(5)).unwrap();
        assert_eq!(device.read_sectors(1, 2).unwrap(), vec![7u8; 1024]);
        assert!(device.read_sectors(3, 2).is_err());
    }

    #[test]
    fn test_slow_sector_times_out() {
        let inner = Arc::new(
            MemoryBlockDevice::new(vec![0u8; 2048], 512)
                .with_slow_sector(2, Duration::from_millis(300)),
        );
        let device = TimeoutBlockDevice::new(inner, Duration::from_millis(100)).unwrap();
        assert!(matches!(
            device.read_sectors(2, 1),
            Err(BlockDeviceError::Timeout(2))
        ));

        let lenient = device.read_sectors_lenient(0, 4).unwrap();
        assert_eq!(lenient.bad_sectors, vec![2]);
    }

    #[test]
    fn test_timeout_only_marks_the_slow_sector() {
        let mut data = vec![0x11u8; 512 * 16];
        data[512 * 3..512 * 4].fill(0x33);
        let inner = Arc::new(
            MemoryBlockDevice::new(data, 512).with_slow_sector(2, Duration::from_millis(300)),
        );
        let device = TimeoutBlockDevice::new(inner, Duration::from_millis(100)).unwrap();

        let lenient = device.read_sectors_lenient(0, 8).unwrap();
        assert_eq!(lenient.bad_sectors, vec![2]);
        assert!(lenient.data[512 * 2..512 * 3].iter().all(|&b| b == 0));
        assert_eq!(lenient.data[0], 0x11);
        assert_eq!(lenient.data[512 * 3], 0x33);
        assert_eq!(device.read_sectors(4, 1).unwrap(), vec![0x11u8; 512]);
    }
}

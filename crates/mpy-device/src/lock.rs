//! Per-device operation lock.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{DeviceError, DeviceResult};

pub const READING_FILE: &str = "Currently Reading File";
pub const WRITING_FILE: &str = "Currently Writing File";
pub const READING_DIR: &str = "Currently Reading Dir";
pub const CREATING_FILE: &str = "Currently Creating File";
pub const CREATING_FOLDER: &str = "Currently Creating Folder";
pub const DELETING: &str = "Currently Deleting";
pub const RENAMING: &str = "Currently Renaming";
pub const RUNNING_SCRIPT: &str = "Running Script";

/// Exclusive token held for the duration of one filesystem operation.
///
/// Holds the description of the running operation; a second caller is
/// rejected with that description instead of queueing.
#[derive(Debug, Clone, Default)]
pub struct OperationLock {
    held: Arc<Mutex<Option<&'static str>>>,
}

impl OperationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock or fail with [`DeviceError::Busy`].
    pub fn try_acquire(&self, description: &'static str) -> DeviceResult<LockGuard> {
        let mut held = self.held.lock();
        if let Some(current) = *held {
            return Err(DeviceError::Busy(current.to_string()));
        }
        *held = Some(description);
        Ok(LockGuard {
            held: self.held.clone(),
        })
    }

    /// Description of the running operation, if any.
    pub fn current(&self) -> Option<&'static str> {
        *self.held.lock()
    }
}

/// Releases the lock on drop.
#[derive(Debug)]
pub struct LockGuard {
    held: Arc<Mutex<Option<&'static str>>>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        *self.held.lock() = None;
    }
}

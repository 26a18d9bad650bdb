//! Entry point to the device SDK

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::device::Camera;
use crate::driver::{AccessMode, StreamDriver};
use crate::error::{CaptureError, Result};

/// Owns the driver and its startup state.
///
/// Startup is reference counted: nested `startup`/`shutdown` pairs are
/// allowed and only the outermost pair reaches the driver.
pub struct System {
    driver: Arc<dyn StreamDriver>,
    users: Mutex<usize>,
}

impl System {
    pub fn new(driver: Arc<dyn StreamDriver>) -> Self {
        Self {
            driver,
            users: Mutex::new(0),
        }
    }

    pub fn driver(&self) -> &Arc<dyn StreamDriver> {
        &self.driver
    }

    pub fn startup(&self) -> Result<()> {
        let mut users = self.users.lock();
        if *users == 0 {
            self.driver
                .startup()
                .map_err(|code| CaptureError::from_native("system", "-", code))?;
            info!("Capture system started");
        }
        *users += 1;
        debug!("System users: {}", *users);
        Ok(())
    }

    /// Release one startup. Extra calls are ignored.
    pub fn shutdown(&self) -> Result<()> {
        let mut users = self.users.lock();
        match *users {
            0 => Ok(()),
            1 => {
                *users = 0;
                self.driver
                    .shutdown()
                    .map_err(|code| CaptureError::from_native("system", "-", code))?;
                info!("Capture system shut down");
                Ok(())
            }
            _ => {
                *users -= 1;
                Ok(())
            }
        }
    }

    pub fn is_running(&self) -> bool {
        *self.users.lock() > 0
    }

    /// Start the system for the lifetime of the returned guard
    pub fn enter(&self) -> Result<SystemGuard<'_>> {
        self.startup()?;
        Ok(SystemGuard { system: self })
    }

    pub fn open_camera(&self, id: &str, mode: AccessMode) -> Result<Camera> {
        if !self.is_running() {
            return Err(CaptureError::SystemNotStarted);
        }
        Camera::open(self.driver.clone(), id, mode)
    }
}

/// Keeps the [`System`] started until dropped
pub struct SystemGuard<'a> {
    system: &'a System,
}

impl SystemGuard<'_> {
    pub fn system(&self) -> &System {
        self.system
    }
}

impl Drop for SystemGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.system.shutdown() {
            warn!("Failed to shut down capture system: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{SimConfig, SimOp, SimulatedDriver};
    use crate::driver::ErrorCode;

    fn system() -> (Arc<SimulatedDriver>, System) {
        let driver = Arc::new(SimulatedDriver::new(SimConfig::default()));
        (driver.clone(), System::new(driver))
    }

    #[test]
    fn test_nested_startup() {
        let (driver, system) = system();
        {
            let _outer = system.enter().unwrap();
            {
                let _inner = system.enter().unwrap();
                assert!(driver.is_started());
            }
            assert!(driver.is_started());
        }
        assert!(!driver.is_started());
        assert!(!system.is_running());

        // unbalanced shutdown is harmless
        system.shutdown().unwrap();
    }

    #[test]
    fn test_open_camera_requires_startup() {
        let (_driver, system) = system();
        assert!(matches!(
            system.open_camera("DEV_SIM", AccessMode::Full),
            Err(CaptureError::SystemNotStarted)
        ));

        let _guard = system.enter().unwrap();
        let camera = system.open_camera("DEV_SIM", AccessMode::Full).unwrap();
        assert_eq!(camera.id(), "DEV_SIM");
    }

    #[test]
    fn test_failed_startup_is_not_counted() {
        let (driver, system) = system();
        driver.fail_next(SimOp::Startup, ErrorCode::NotFound);
        assert!(system.enter().is_err());
        assert!(!system.is_running());
        assert!(system.enter().is_ok());
    }
}

//! Hardware interface trait and a deterministic in-memory mock.
//!
//! This crate owns only the trait boundary and a test double; a real
//! stage/camera/illumination driver is a separate concern entirely outside
//! this crate's scope.

use crate::error::{AcqError, Result};
use crate::types::{CapturedImage, FovId};
use ndarray::Array2;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;

/// Synchronous hardware operations the worker drives. All operations are
/// called only from the worker thread; implementations need not be
/// `Sync`-safe for concurrent calls from multiple threads.
pub trait HardwareInterface: Send {
    /// Move the stage to the given position, millimeters.
    fn move_to(&mut self, x_mm: f64, y_mm: f64, z_mm: f64) -> Result<()>;

    /// Select the active illumination/detection channel.
    fn set_channel(&mut self, channel_id: &str) -> Result<()>;

    /// Trigger one capture on the current channel at the current position.
    fn trigger_capture(&mut self) -> Result<CapturedImage>;

    /// Current absolute Z position, micrometers.
    fn current_z_um(&self) -> f64;

    /// Current piezo-Z displacement, micrometers, if a piezo stage is present.
    fn piezo_z_um(&self) -> Option<f64>;
}

/// A deterministic, seedable in-memory hardware mock for tests. Produces
/// synthetic images whose content depends only on the FOV and a fixed
/// seed, so test assertions about focus scores are reproducible.
pub struct MockHardware {
    seed: u64,
    position: Mutex<(f64, f64, f64)>,
    channel: Mutex<String>,
    image_size: (usize, usize),
    fail_on: Option<FovId>,
    capture_delay: Duration,
}

impl MockHardware {
    /// Construct a mock with a fixed seed and image size.
    pub fn new(seed: u64, image_size: (usize, usize)) -> Self {
        Self {
            seed,
            position: Mutex::new((0.0, 0.0, 0.0)),
            channel: Mutex::new("DAPI".to_string()),
            image_size,
            fail_on: None,
            capture_delay: Duration::from_millis(0),
        }
    }

    /// Slow each `trigger_capture` down by a fixed delay, so tests can
    /// reliably race a pause/abort request against an in-flight capture.
    pub fn with_capture_delay(mut self, delay: Duration) -> Self {
        self.capture_delay = delay;
        self
    }

    /// Make the next `trigger_capture` call fail with a hardware error,
    /// regardless of which FOV is in progress. `fov` is recorded only for
    /// the caller's own bookkeeping. Used to exercise fatal-error
    /// propagation in tests.
    pub fn fail_next_capture_for(&mut self, fov: FovId) {
        self.fail_on = Some(fov);
    }

    fn synthesize(&self, x_mm: f64, y_mm: f64) -> CapturedImage {
        let (h, w) = self.image_size;
        let mut samples = Array2::<f64>::zeros((h, w));
        let bias = (x_mm * 1000.0 + y_mm * 7000.0 + self.seed as f64).fract().abs();
        for i in 0..h {
            for j in 0..w {
                let pattern = ((i * 31 + j * 17) as f64 + bias * 500.0).sin().abs();
                samples[[i, j]] = pattern * 255.0;
            }
        }
        CapturedImage::new(samples)
    }
}

impl HardwareInterface for MockHardware {
    fn move_to(&mut self, x_mm: f64, y_mm: f64, z_mm: f64) -> Result<()> {
        debug!(x_mm, y_mm, z_mm, "mock stage move");
        *self.position.lock() = (x_mm, y_mm, z_mm);
        Ok(())
    }

    fn set_channel(&mut self, channel_id: &str) -> Result<()> {
        *self.channel.lock() = channel_id.to_string();
        Ok(())
    }

    fn trigger_capture(&mut self) -> Result<CapturedImage> {
        if !self.capture_delay.is_zero() {
            std::thread::sleep(self.capture_delay);
        }
        if self.fail_on.is_some() {
            self.fail_on = None;
            return Err(AcqError::HardwareError {
                fov: None,
                message: "simulated capture failure".into(),
            });
        }
        let (x, y, _z) = *self.position.lock();
        Ok(self.synthesize(x, y))
    }

    fn current_z_um(&self) -> f64 {
        self.position.lock().2 * 1000.0
    }

    fn piezo_z_um(&self) -> Option<f64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_moves_and_captures_deterministically() {
        let mut hw = MockHardware::new(42, (8, 8));
        hw.move_to(1.0, 2.0, 0.01).unwrap();
        let img1 = hw.trigger_capture().unwrap();
        hw.move_to(1.0, 2.0, 0.01).unwrap();
        let img2 = hw.trigger_capture().unwrap();
        assert_eq!(img1.samples(), img2.samples());
    }

    #[test]
    fn failure_injection_surfaces_hardware_error() {
        let mut hw = MockHardware::new(1, (4, 4));
        hw.fail_next_capture_for(FovId::new("A", 0));
        hw.move_to(0.0, 0.0, 0.0).unwrap();
        assert!(hw.trigger_capture().is_err());
        // subsequent calls succeed again
        assert!(hw.trigger_capture().is_ok());
    }
}

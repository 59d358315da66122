use accutrace_gpu::{Device, DeviceError, Extent};

/// Keeps a running average of per-frame samples.
///
/// The raw target receives one fresh sample per frame; [`accumulate`] folds it
/// into the converged target so that after `n` samples the converged image is
/// the mean of those `n` samples. Anything that invalidates the average
/// (camera movement, geometry change, a new target size) must call [`reset`]
/// before the next blend.
///
/// [`accumulate`]: ConvergenceAccumulator::accumulate
/// [`reset`]: ConvergenceAccumulator::reset
pub struct ConvergenceAccumulator<D: Device> {
    raw:          Option<D::Image>,
    converged:    Option<D::Image>,
    sample_count: u32,
}

impl<D: Device> Default for ConvergenceAccumulator<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> ConvergenceAccumulator<D> {
    pub fn new() -> Self {
        Self { raw: None, converged: None, sample_count: 0 }
    }

    /// Makes both targets exactly `extent` in size. Replacing either target
    /// restarts accumulation.
    pub fn ensure_targets(&mut self, device: &D, extent: Extent) -> Result<(), DeviceError> {
        let raw_changed = Self::ensure_target(device, &mut self.raw, extent)?;
        let converged_changed = Self::ensure_target(device, &mut self.converged, extent)?;
        if raw_changed || converged_changed {
            log::info!("Render targets allocated at {}x{}", extent.width, extent.height);
            self.reset();
        }
        Ok(())
    }

    fn ensure_target(device: &D, target: &mut Option<D::Image>, extent: Extent) -> Result<bool, DeviceError> {
        if let Some(image) = target.as_ref() {
            if device.image_extent(image) == extent {
                return Ok(false);
            }
        }
        if let Some(stale) = target.take() {
            device.destroy_image(stale);
        }
        *target = Some(device.create_image(extent)?);
        Ok(true)
    }

    pub fn reset(&mut self) {
        if self.sample_count > 0 {
            log::debug!("Accumulation reset after {} samples", self.sample_count);
        }
        self.sample_count = 0;
    }

    /// Blends the raw target into the converged one and returns the result.
    pub fn accumulate(&mut self, device: &D) -> Result<&D::Image, DeviceError> {
        let (raw, converged) = match (self.raw.as_ref(), self.converged.as_mut()) {
            (Some(raw), Some(converged)) => (raw, converged),
            _ => return Err(DeviceError::Backend("cannot accumulate before render targets exist".to_string())),
        };
        device.blend(raw, converged, self.sample_count)?;
        self.sample_count = self.sample_count.saturating_add(1);
        Ok(converged)
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn extent(&self, device: &D) -> Option<Extent> {
        self.raw.as_ref().map(|image| device.image_extent(image))
    }

    pub fn raw_target_mut(&mut self) -> Option<&mut D::Image> {
        self.raw.as_mut()
    }

    pub fn converged_target(&self) -> Option<&D::Image> {
        self.converged.as_ref()
    }

    pub fn destroy(&mut self, device: &D) {
        if let Some(image) = self.raw.take() {
            device.destroy_image(image);
        }
        if let Some(image) = self.converged.take() {
            device.destroy_image(image);
        }
        self.sample_count = 0;
    }
}

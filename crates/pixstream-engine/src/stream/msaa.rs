//! Render targets for the read-back stream.
//!
//! With one sample the render surface is read directly. With more, rendering
//! goes to a multisampled surface (color + depth) which is resolved into a
//! single-sample surface right before every read-back.

use crate::device::{DeviceCapabilities, TransferDevice};
use crate::error::{Result, StreamError};
use crate::format::Extent;

/// Effective sample count for a request: the largest supported count not above
/// it. 0 and 1 mean no multisampling.
pub(crate) fn check_samples(requested: u32, caps: &DeviceCapabilities) -> Result<u32> {
    if requested <= 1 {
        return Ok(1);
    }
    if !caps.multisample {
        return Err(StreamError::UnsupportedCapability("multisampled render targets"));
    }

    let samples = caps.samples_at_most(requested);
    if samples != requested {
        log::debug!("sample count {requested} lowered to {samples}");
    }
    Ok(samples)
}

pub(crate) struct RenderTargets<D: TransferDevice> {
    render: D::Surface,
    resolve: Option<D::Surface>,
}

impl<D: TransferDevice> RenderTargets<D> {
    pub(crate) fn new(device: &mut D, extent: Extent, samples: u32) -> Result<Self> {
        let render = device.create_surface(extent, samples, true)?;
        let resolve = if samples > 1 {
            Some(device.create_surface(extent, 1, false)?)
        } else {
            None
        };

        Ok(Self { render, resolve })
    }

    /// Surface the caller renders into.
    #[inline]
    pub(crate) fn render(&self) -> &D::Surface {
        &self.render
    }

    /// Resolves if needed and returns the surface to copy pixels from.
    pub(crate) fn prepare_read(&self, device: &mut D) -> Result<&D::Surface> {
        match &self.resolve {
            Some(resolve) => {
                device.resolve(&self.render, resolve)?;
                Ok(resolve)
            }
            None => Ok(&self.render),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::device::SoftwareDevice;
    use crate::format::Bgra8;

    #[test]
    fn single_sample_reads_render_surface() {
        let mut device = SoftwareDevice::new();
        let targets = RenderTargets::new(&mut device, Extent::new(4, 4), 1).unwrap();
        let source = targets.prepare_read(&mut device).unwrap();

        assert!(std::ptr::eq(source, targets.render()));
        assert!(targets.render().has_depth());
        assert_eq!(device.counters().resolves, 0);
    }

    #[test]
    fn multisampled_resolves_before_read() {
        let mut device = SoftwareDevice::new();
        let targets = RenderTargets::new(&mut device, Extent::new(4, 4), 4).unwrap();
        targets.render().fill(Bgra8::new(9, 8, 7, 255));

        let source = targets.prepare_read(&mut device).unwrap();
        assert_eq!(source.sample_count(), 1);
        assert_eq!(source.pixel(3, 3), Bgra8::new(9, 8, 7, 255));
        assert_eq!(device.counters().resolves, 1);
        assert_eq!(device.counters().surfaces_created, 2);
    }

    #[test]
    fn samples_are_lowered_to_supported_counts() {
        let caps = SoftwareDevice::new().capabilities();
        assert_eq!(check_samples(0, &caps).unwrap(), 1);
        assert_eq!(check_samples(64, &caps).unwrap(), 8);
        assert_eq!(check_samples(3, &caps).unwrap(), 2);
        assert_eq!(check_samples(7, &caps).unwrap(), 4);
        assert_eq!(check_samples(8, &caps).unwrap(), 8);

        // Only 4x: anything between 1 and 4 falls back to a single sample.
        let only_four = DeviceCapabilities {
            sample_counts: 1 | 4,
            ..caps
        };
        assert_eq!(check_samples(2, &only_four).unwrap(), 1);
        assert_eq!(check_samples(3, &only_four).unwrap(), 1);
        assert_eq!(check_samples(6, &only_four).unwrap(), 4);
        assert_eq!(check_samples(16, &only_four).unwrap(), 4);

        let plain = DeviceCapabilities {
            multisample: false,
            ..caps
        };
        assert_eq!(check_samples(1, &plain).unwrap(), 1);
        assert!(matches!(
            check_samples(4, &plain),
            Err(StreamError::UnsupportedCapability(_))
        ));
    }
}

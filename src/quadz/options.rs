//! Tuning for the controller's closed-loop operations.

use std::time::Duration;

/// Options for the [`QuadZ`](super::QuadZ) control loops.
///
/// ## Example
///
/// ```rust
/// # use gsioc::quadz::ControlOptions;
/// # use std::time::Duration;
/// let mut options = ControlOptions::new();
/// options
///     .tip_height(25)
///     .poll_interval(Duration::from_millis(20));
/// assert_eq!(options.z_offset(), 350);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ControlOptions {
    controller_address: u8,
    poll_interval: Duration,
    probe_poll_interval: Duration,
    settle_delay: Duration,
    base_z: i32,
    base_tip_height: i32,
    tip_height: i32,
    pump_start_grace: Duration,
    volume_tolerance: f64,
}

impl ControlOptions {
    /// The factory default address of a Quad-Z: 22.
    pub const DEFAULT_CONTROLLER_ADDRESS: u8 = 22;

    /// Create the default set of options.
    ///
    /// Equivalent to [`default`](ControlOptions::default).
    pub fn new() -> Self {
        ControlOptions {
            controller_address: ControlOptions::DEFAULT_CONTROLLER_ADDRESS,
            poll_interval: Duration::from_millis(50),
            probe_poll_interval: Duration::from_millis(200),
            settle_delay: Duration::from_secs(2),
            base_z: 0,
            base_tip_height: 10,
            tip_height: 20,
            pump_start_grace: Duration::from_secs(2),
            volume_tolerance: 0.5,
        }
    }

    /// Set the bus address of the liquid handler.
    ///
    /// The default is 22.
    pub fn controller_address(&mut self, address: u8) -> &mut Self {
        self.controller_address = address;
        self
    }

    /// Set the interval between position and pump status polls.
    ///
    /// The default is 50 ms.
    pub fn poll_interval(&mut self, interval: Duration) -> &mut Self {
        self.poll_interval = interval;
        self
    }

    /// Set the interval between z position polls while probes move.
    ///
    /// The default is 200 ms.
    pub fn probe_poll_interval(&mut self, interval: Duration) -> &mut Self {
        self.probe_poll_interval = interval;
        self
    }

    /// Set how long to wait before re-sampling a move that has exceeded its
    /// timeout.
    ///
    /// The default is 2 seconds.
    pub fn settle_delay(&mut self, delay: Duration) -> &mut Self {
        self.settle_delay = delay;
        self
    }

    /// Set the z of the bed surface, in millimeters.
    ///
    /// The default is 0.
    pub fn base_z(&mut self, z: i32) -> &mut Self {
        self.base_z = z;
        self
    }

    /// Set the height of the tip holder, in millimeters.
    ///
    /// The default is 10.
    pub fn base_tip_height(&mut self, height: i32) -> &mut Self {
        self.base_tip_height = height;
        self
    }

    /// Set the height of the mounted tips, in millimeters.
    ///
    /// The default is 20.
    pub fn tip_height(&mut self, height: i32) -> &mut Self {
        self.tip_height = height;
        self
    }

    /// Set how long a syringe may take to report that it is running before a
    /// volume mismatch is reported.
    ///
    /// The default is 2 seconds.
    pub fn pump_start_grace(&mut self, grace: Duration) -> &mut Self {
        self.pump_start_grace = grace;
        self
    }

    /// Set how far (in µL) a syringe may end from the expected volume.
    ///
    /// The default is 0.5.
    pub fn volume_tolerance(&mut self, tolerance: f64) -> &mut Self {
        self.volume_tolerance = tolerance;
        self
    }

    /// The bus address of the liquid handler.
    pub fn address(&self) -> u8 {
        self.controller_address
    }

    /// The fixed z offset (in tenths of millimeters) added to every probe
    /// move.
    pub fn z_offset(&self) -> i32 {
        (self.base_z + self.base_tip_height + self.tip_height) * 10
    }

    pub(crate) fn poll(&self) -> Duration {
        self.poll_interval
    }

    pub(crate) fn probe_poll(&self) -> Duration {
        self.probe_poll_interval
    }

    pub(crate) fn settle(&self) -> Duration {
        self.settle_delay
    }

    pub(crate) fn start_grace(&self) -> Duration {
        self.pump_start_grace
    }

    pub(crate) fn tolerance(&self) -> f64 {
        self.volume_tolerance
    }
}

impl Default for ControlOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn z_offset_combines_heights() {
        let mut options = ControlOptions::new();
        assert_eq!(options.z_offset(), 300);
        options.base_z(5).base_tip_height(0).tip_height(1);
        assert_eq!(options.z_offset(), 60);
        assert_eq!(options.address(), 22);
    }
}

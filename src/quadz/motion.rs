//! Closed-loop arm and probe moves.

use super::QuadZ;
use crate::{
	error::{Error, MoveInaccuracy, MoveInaccuracyError},
	Probe,
};
use std::{
	thread,
	time::{Duration, Instant},
};

/// A position of the arm, in tenths of millimeters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct ArmPosition {
	/// The x position.
	pub x: i32,
	/// The y position.
	pub y: i32,
}

/// The last known state of a probe, refreshed by the controller's queries.
///
/// A field is `None` until the corresponding query has been made.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct ProbeKinematics {
	/// The x position, in tenths of millimeters.
	pub x: Option<i32>,
	/// The z position, in tenths of millimeters.
	pub z: Option<i32>,
	/// The speed, in micrometers per second.
	pub speed: Option<i32>,
	/// The liquid level sensitivity.
	pub liquid_sensitivity: Option<i32>,
}

impl QuadZ {
	/// Sample the x position of `probe` and the y position of the arm.
	fn sample_arm(&self, probe: Probe) -> Result<ArmPosition, Error> {
		let x = self.probe_x_positions()?[probe.index()];
		let y = self.y_position()?;
		Ok(ArmPosition { x, y })
	}

	/// Move the arm so that `probe` is at (`x`, `y`) and wait for it to get
	/// there.
	///
	/// The position is polled until it matches the target. Once `timeout` has
	/// passed without reaching it, one sample is taken after an extra settling
	/// delay, and a sample identical to the one before it (and still off
	/// target) means the arm has stalled. Otherwise the timeout starts over, so
	/// an arm that keeps moving is never timed out.
	pub fn move_to(&self, x: i32, y: i32, probe: Probe, timeout: Duration) -> Result<(), Error> {
		let target = ArmPosition { x, y };
		self.set_probe_position(probe, x, y)?;
		self.wait_for_buffered()?;

		let started = Instant::now();
		let mut deadline = started + timeout;
		let mut sample = self.sample_arm(probe)?;
		while sample != target {
			if Instant::now() > deadline {
				thread::sleep(self.options.settle());
				let resample = self.sample_arm(probe)?;
				if resample == sample {
					let elapsed = started.elapsed();
					log::warn!("arm stalled at {resample:?} moving to {target:?}");
					return Err(MoveInaccuracyError::new(MoveInaccuracy::Arm {
						requested: target,
						actual: resample,
						elapsed,
					})
					.into());
				}
				sample = resample;
				deadline = Instant::now() + timeout;
			} else {
				thread::sleep(self.options.poll());
				sample = self.sample_arm(probe)?;
			}
		}
		log::debug!("arm reached {target:?} in {:?}", started.elapsed());
		Ok(())
	}

	/// Move `probes` to `z_offset` above the bed and wait for them to get
	/// there.
	///
	/// The commanded z adds the configured base and tip heights
	/// ([`ControlOptions::z_offset`](super::ControlOptions::z_offset)) to
	/// `z_offset`. Stalls are detected per probe the same way
	/// [`move_to`](QuadZ::move_to) detects them for the arm. With
	/// `liquid_sensing`, a probe that stops short of the target has found the
	/// liquid surface and is not reported as stalled.
	pub fn move_probe(
		&self,
		z_offset: i32,
		probes: &[Probe],
		liquid_sensing: bool,
		timeout: Duration,
	) -> Result<(), Error> {
		if probes.is_empty() {
			return Ok(());
		}
		let target = z_offset + self.options.z_offset();
		for &probe in probes {
			self.set_probe_z(probe, target, liquid_sensing)?;
		}
		self.start_probe_move(liquid_sensing)?;
		self.wait_for_buffered()?;

		let mut deadline = Instant::now() + timeout;
		let at_target = |z: &[i32; 4]| probes.iter().all(|probe| z[probe.index()] == target);
		loop {
			thread::sleep(self.options.probe_poll());
			let sample = self.probe_z_positions()?;
			if at_target(&sample) {
				return Ok(());
			}
			if Instant::now() <= deadline {
				continue;
			}
			thread::sleep(self.options.settle());
			let resample = self.probe_z_positions()?;
			let stalled: Vec<(Probe, i32)> = probes
				.iter()
				.map(|&probe| (probe, resample[probe.index()]))
				.filter(|&(probe, z)| z != target && z == sample[probe.index()])
				.collect();
			if stalled.is_empty() {
				if at_target(&resample) {
					return Ok(());
				}
				deadline = Instant::now() + timeout;
				continue;
			}
			if liquid_sensing {
				// Keep waiting for probes that are still descending.
				let moving = probes.iter().any(|probe| {
					let i = probe.index();
					resample[i] != target && resample[i] != sample[i]
				});
				if !moving {
					log::debug!("liquid found at {stalled:?}");
					return Ok(());
				}
				deadline = Instant::now() + timeout;
				continue;
			}
			log::warn!("probes stalled short of z={target}: {stalled:?}");
			return Err(MoveInaccuracyError::new(MoveInaccuracy::Probes {
				requested: target,
				stalled,
			})
			.into());
		}
	}
}

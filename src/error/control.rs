//! Error types produced by the Quad-Z controller and its control loops.

use crate::{quadz::ArmPosition, Probe};
use std::time::Duration;

/// An immediate response could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnexpectedResponseError {
	address: u8,
	command: Box<str>,
	response: Box<str>,
}

impl UnexpectedResponseError {
	pub(crate) fn new(address: u8, command: &str, response: &str) -> Self {
		UnexpectedResponseError {
			address,
			command: command.into(),
			response: response.into(),
		}
	}

	/// The address of the device that sent the response.
	pub fn address(&self) -> u8 {
		self.address
	}

	/// The command that elicited the response.
	pub fn command(&self) -> &str {
		&self.command
	}

	/// The response itself.
	pub fn response(&self) -> &str {
		&self.response
	}
}

impl_error_display! {
	UnexpectedResponseError,
	self => "unexpected response {:?} from device {} to {:?}",
	self.response,
	self.address,
	self.command
}

/// A syringe pump operation referenced a probe with no pump channel assigned.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ProbeNotAssignedError {
	probe: Probe,
}

impl ProbeNotAssignedError {
	pub(crate) const fn new(probe: Probe) -> Self {
		ProbeNotAssignedError { probe }
	}

	/// The probe without a syringe pump channel.
	pub fn probe(&self) -> Probe {
		self.probe
	}
}

impl_error_display! {
	ProbeNotAssignedError,
	self => "probe {} is not connected to a registered syringe pump",
	self.probe
}

/// Details about where an actuator stalled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveInaccuracy {
	/// The arm stopped short of an (x, y) target.
	Arm {
		/// The requested position.
		requested: ArmPosition,
		/// Where the arm came to rest.
		actual: ArmPosition,
		/// How long the move was given before it was declared stalled.
		elapsed: Duration,
	},
	/// One or more probes stopped short of a z target.
	Probes {
		/// The commanded z position.
		requested: i32,
		/// The probes that stalled, with the position each came to rest at.
		stalled: Vec<(Probe, i32)>,
	},
}

/// An actuator stalled before reaching its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveInaccuracyError(Box<MoveInaccuracy>);

impl MoveInaccuracyError {
	pub(crate) fn new(detail: MoveInaccuracy) -> Self {
		MoveInaccuracyError(Box::new(detail))
	}

	/// Where and how the actuator stalled.
	pub fn detail(&self) -> &MoveInaccuracy {
		&self.0
	}
}

impl std::error::Error for MoveInaccuracyError {}

impl std::fmt::Display for MoveInaccuracyError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self.detail() {
			MoveInaccuracy::Arm {
				requested,
				actual,
				elapsed,
			} => write!(
				f,
				"movement to ({}, {}) took {:.2}s and stopped at ({}, {})",
				requested.x,
				requested.y,
				elapsed.as_secs_f64(),
				actual.x,
				actual.y
			),
			MoveInaccuracy::Probes { requested, stalled } => {
				write!(f, "the following probes failed to reach z={requested}:")?;
				for (probe, z) in stalled {
					write!(f, " {probe} (at {z})")?;
				}
				Ok(())
			}
		}
	}
}

/// What went wrong with a fluid transfer.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum VolumeErrorKind {
	/// The syringe does not hold enough fluid for the requested transfer.
	InsufficientVolume {
		/// The volume currently in the syringe, in µL.
		available: f64,
		/// The volume requested, in µL.
		requested: f64,
	},
	/// The syringe does not have room for the requested transfer.
	InsufficientHeadroom {
		/// The free capacity of the syringe, in µL.
		headroom: f64,
		/// The volume requested, in µL.
		requested: f64,
	},
	/// The syringe stopped at a volume other than the expected one.
	Mismatch {
		/// The volume the syringe should have ended at, in µL.
		expected: f64,
		/// The volume it actually reports, in µL.
		actual: f64,
	},
}

/// A fluid transfer could not be started or did not deliver the expected volume.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct VolumeError {
	probe: Probe,
	kind: VolumeErrorKind,
}

impl VolumeError {
	pub(crate) const fn insufficient_volume(probe: Probe, available: f64, requested: f64) -> Self {
		VolumeError {
			probe,
			kind: VolumeErrorKind::InsufficientVolume {
				available,
				requested,
			},
		}
	}

	pub(crate) const fn insufficient_headroom(probe: Probe, headroom: f64, requested: f64) -> Self {
		VolumeError {
			probe,
			kind: VolumeErrorKind::InsufficientHeadroom {
				headroom,
				requested,
			},
		}
	}

	pub(crate) const fn mismatch(probe: Probe, expected: f64, actual: f64) -> Self {
		VolumeError {
			probe,
			kind: VolumeErrorKind::Mismatch { expected, actual },
		}
	}

	/// The probe whose syringe failed.
	pub fn probe(&self) -> Probe {
		self.probe
	}

	/// What went wrong.
	pub fn kind(&self) -> VolumeErrorKind {
		self.kind
	}
}

impl std::error::Error for VolumeError {}

impl std::fmt::Display for VolumeError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self.kind {
			VolumeErrorKind::InsufficientVolume {
				available,
				requested,
			} => write!(
				f,
				"syringe for probe {} holds {available} uL, not enough to transfer {requested} uL",
				self.probe
			),
			VolumeErrorKind::InsufficientHeadroom {
				headroom,
				requested,
			} => write!(
				f,
				"syringe for probe {} has room for {headroom} uL, not enough to transfer {requested} uL",
				self.probe
			),
			VolumeErrorKind::Mismatch { expected, actual } => write!(
				f,
				"probe {} did not pump the desired volume: expected {expected} uL, syringe reports {actual} uL",
				self.probe
			),
		}
	}
}

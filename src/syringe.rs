//! The 402 syringe pump data model.
//!
//! A 402 pump has two syringes (its left and right [`Side`]s) behind a single
//! bus address, each feeding one [`Probe`]. Replies from the pump always carry
//! both sides, so every update resolves which probe each half belongs to
//! through a probe lookup table built when the pump is added.

use crate::Probe;
use std::fmt;

/// One of the two syringes of a 402 pump.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Side {
	/// The left syringe.
	Left,
	/// The right syringe.
	Right,
}

impl Side {
	/// The letter used for this side in pump commands.
	pub const fn letter(self) -> char {
		match self {
			Side::Left => 'L',
			Side::Right => 'R',
		}
	}

	/// The other side.
	pub const fn opposite(self) -> Side {
		match self {
			Side::Left => Side::Right,
			Side::Right => Side::Left,
		}
	}
}

/// Which side(s) of a pump a command applies to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Target {
	One(Side),
	Both,
}

impl Target {
	pub(crate) const fn new(side: Side, both: bool) -> Self {
		if both {
			Target::Both
		} else {
			Target::One(side)
		}
	}

	pub(crate) const fn letter(self) -> char {
		match self {
			Target::One(side) => side.letter(),
			Target::Both => 'B',
		}
	}

	pub(crate) fn includes(self, side: Side) -> bool {
		match self {
			Target::One(s) => s == side,
			Target::Both => true,
		}
	}
}

/// The position of a syringe's valve.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Valve {
	/// Connected to the reservoir.
	Reservoir,
	/// Connected to the needle (probe).
	Needle,
}

impl Valve {
	/// The letter used for this position on the wire.
	pub const fn letter(self) -> char {
		match self {
			Valve::Reservoir => 'R',
			Valve::Needle => 'N',
		}
	}

	/// Parse a valve letter.
	pub const fn from_letter(letter: char) -> Option<Valve> {
		match letter {
			'R' => Some(Valve::Reservoir),
			'N' => Some(Valve::Needle),
			_ => None,
		}
	}
}

/// The one-character status a 402 pump reports for each syringe.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SyringeStatus {
	/// `R`: the plunger is moving.
	Running,
	/// `I`: the syringe is initializing.
	Initializing,
	/// `H`: a volume has been set and the syringe is waiting to start.
	Holding,
	/// `N`: idle and ready for a command.
	Ready,
	/// Any other code.
	Other(char),
}

impl SyringeStatus {
	/// Decode a status character.
	pub const fn from_char(c: char) -> SyringeStatus {
		match c {
			'R' => SyringeStatus::Running,
			'I' => SyringeStatus::Initializing,
			'H' => SyringeStatus::Holding,
			'N' => SyringeStatus::Ready,
			other => SyringeStatus::Other(other),
		}
	}

	/// The status character.
	pub const fn as_char(self) -> char {
		match self {
			SyringeStatus::Running => 'R',
			SyringeStatus::Initializing => 'I',
			SyringeStatus::Holding => 'H',
			SyringeStatus::Ready => 'N',
			SyringeStatus::Other(c) => c,
		}
	}
}

impl fmt::Display for SyringeStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.as_char())
	}
}

/// What a syringe is doing, derived from its status and the pending operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SyringeActivity {
	/// Not moving.
	Idle,
	/// Drawing fluid in.
	Aspirating,
	/// Pushing fluid out.
	Dispensing,
	/// Running its initialization sequence.
	Initializing,
}

/// The cached state of the syringe feeding one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpChannelState {
	/// The bus address of the pump.
	pub address: u8,
	/// The side of the pump feeding this probe.
	pub side: Side,
	/// The probe fed by the other side of the same pump.
	pub partner: Probe,
	/// The last reported status.
	pub status: SyringeStatus,
	/// The last reported volume in the syringe, in µL.
	pub current_volume: f64,
	/// The last reported valve position.
	pub valve: Valve,
	/// The configured syringe size in µL, or 0 if unknown.
	pub syringe_size: u32,
	/// The configured flow rate in mL/min.
	pub flow_rate: f64,
	/// The configured motor force.
	pub motor_force: u8,
	/// The signed volume of the operation that has been set but not yet
	/// completed: negative aspirates, positive dispenses.
	pub pending_volume: f64,
}

impl PumpChannelState {
	fn new(address: u8, side: Side, partner: Probe) -> Self {
		PumpChannelState {
			address,
			side,
			partner,
			status: SyringeStatus::Initializing,
			current_volume: 0.0,
			valve: Valve::Needle,
			syringe_size: 0,
			flow_rate: 10.0,
			motor_force: 3,
			pending_volume: 0.0,
		}
	}

	/// What the syringe is currently doing.
	pub fn activity(&self) -> SyringeActivity {
		match self.status {
			SyringeStatus::Initializing => SyringeActivity::Initializing,
			SyringeStatus::Running if self.pending_volume < 0.0 => SyringeActivity::Aspirating,
			SyringeStatus::Running if self.pending_volume > 0.0 => SyringeActivity::Dispensing,
			_ => SyringeActivity::Idle,
		}
	}

	/// The free capacity of the syringe, in µL.
	pub fn headroom(&self) -> f64 {
		(f64::from(self.syringe_size) - self.current_volume).max(0.0)
	}
}

/// Where the syringe feeding a probe lives.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PumpChannel {
	/// The bus address of the pump.
	pub address: u8,
	/// The side of the pump.
	pub side: Side,
	/// The probe on the other side.
	pub partner: Probe,
}

impl PumpChannel {
	/// The probe fed by `side` of this channel's pump, given that this
	/// channel feeds `probe`.
	pub fn probe_on(&self, probe: Probe, side: Side) -> Probe {
		if side == self.side {
			probe
		} else {
			self.partner
		}
	}
}

/// The probe → pump channel lookup table, plus the cached state of each
/// channel.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChannelMap {
	channels: [Option<PumpChannelState>; 4],
}

impl ChannelMap {
	/// Assign both sides of the pump at `address`, replacing any earlier
	/// assignment of those probes.
	///
	/// A probe left partnered with a reassigned probe is unassigned, as are the
	/// probes of any earlier assignment of `address`.
	pub fn assign(&mut self, address: u8, left: Probe, right: Probe) {
		for slot in &mut self.channels {
			let stale = slot.as_ref().is_some_and(|state| {
				state.address == address || state.partner == left || state.partner == right
			});
			if stale {
				*slot = None;
			}
		}
		self.channels[left.index()] = Some(PumpChannelState::new(address, Side::Left, right));
		self.channels[right.index()] = Some(PumpChannelState::new(address, Side::Right, left));
	}

	pub fn channel(&self, probe: Probe) -> Option<PumpChannel> {
		self.channels[probe.index()]
			.as_ref()
			.map(|state| PumpChannel {
				address: state.address,
				side: state.side,
				partner: state.partner,
			})
	}

	pub fn state(&self, probe: Probe) -> Option<&PumpChannelState> {
		self.channels[probe.index()].as_ref()
	}

	/// Replace the state of `probe` with `f` applied to a copy of it.
	///
	/// Whole records are swapped so readers never see a partial update.
	pub fn update<F>(&mut self, probe: Probe, f: F)
	where
		F: FnOnce(&mut PumpChannelState),
	{
		if let Some(slot) = self.channels.get_mut(probe.index()) {
			if let Some(current) = slot.as_ref() {
				let mut next = current.clone();
				f(&mut next);
				*slot = Some(next);
			}
		}
	}

	/// The addresses of every assigned pump, without duplicates, in probe order.
	pub fn addresses(&self) -> Vec<u8> {
		let mut addresses = Vec::new();
		for state in self.channels.iter().flatten() {
			if !addresses.contains(&state.address) {
				addresses.push(state.address);
			}
		}
		addresses
	}
}

/// The buffer and error flags reported by a pump's global status query.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct GlobalStatus {
	/// The command buffer status: 0 when the pump can accept a command.
	pub buffer: u8,
	/// The error flag: 0 when there is no error.
	pub error: u8,
}

/// Parse a global status reply, such as `"00"`.
pub(crate) fn parse_global_status(reply: &str) -> Option<GlobalStatus> {
	let mut digits = reply.chars().map(|c| c.to_digit(10));
	let buffer = digits.next()??;
	let error = digits.next()??;
	Some(GlobalStatus {
		buffer: buffer as u8,
		error: error as u8,
	})
}

/// Parse a syringe status reply such as `"N200.0R12.5"` into the left and
/// right (status, volume) pairs.
pub(crate) fn parse_pump_status(reply: &str) -> Option<[(SyringeStatus, f64); 2]> {
	fn half(s: &str) -> Option<((SyringeStatus, f64), &str)> {
		let mut chars = s.chars();
		let status = chars.next().filter(char::is_ascii_uppercase)?;
		let rest = chars.as_str();
		let end = rest
			.find(|c: char| !(c.is_ascii_digit() || c == '.'))
			.unwrap_or(rest.len());
		let volume = rest[..end].parse().ok()?;
		Some(((SyringeStatus::from_char(status), volume), &rest[end..]))
	}

	let (left, rest) = half(reply)?;
	let (right, _) = half(rest)?;
	Some([left, right])
}

/// Parse a valve reply such as `"RN"` into the left and right positions.
pub(crate) fn parse_valves(reply: &str) -> Option<[Valve; 2]> {
	let mut chars = reply.chars();
	let left = Valve::from_letter(chars.next()?)?;
	let right = Valve::from_letter(chars.next()?)?;
	Some([left, right])
}

/// Format a volume for a pump command: whole numbers keep one decimal place.
pub(crate) fn format_volume(volume: f64) -> String {
	if volume.fract().abs() < f64::EPSILON {
		format!("{volume:.1}")
	} else {
		format!("{volume}")
	}
}

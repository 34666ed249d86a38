//! Identifiers for the four liquid-handling probes of a Quad-Z.

use std::fmt;

/// One of the instrument's four probes, numbered left to right.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Probe {
	/// Probe 1 (`a` on the wire).
	One,
	/// Probe 2 (`b` on the wire).
	Two,
	/// Probe 3 (`c` on the wire).
	Three,
	/// Probe 4 (`d` on the wire).
	Four,
}

impl Probe {
	/// All probes, left to right.
	pub const ALL: [Probe; 4] = [Probe::One, Probe::Two, Probe::Three, Probe::Four];

	/// Get the probe with the given 1-based number.
	///
	/// Returns `None` if `number` is not in `1..=4`.
	pub const fn new(number: u8) -> Option<Probe> {
		match number {
			1 => Some(Probe::One),
			2 => Some(Probe::Two),
			3 => Some(Probe::Three),
			4 => Some(Probe::Four),
			_ => None,
		}
	}

	/// The 1-based probe number.
	pub const fn number(self) -> u8 {
		self.index() as u8 + 1
	}

	/// The 0-based index, for per-probe arrays.
	pub const fn index(self) -> usize {
		match self {
			Probe::One => 0,
			Probe::Two => 1,
			Probe::Three => 2,
			Probe::Four => 3,
		}
	}

	/// The letter the controller uses to address this probe.
	pub const fn letter(self) -> char {
		match self {
			Probe::One => 'a',
			Probe::Two => 'b',
			Probe::Three => 'c',
			Probe::Four => 'd',
		}
	}
}

impl fmt::Display for Probe {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.number())
	}
}

impl TryFrom<u8> for Probe {
	type Error = u8;

	fn try_from(number: u8) -> Result<Self, Self::Error> {
		Probe::new(number).ok_or(number)
	}
}

//! The Quad-Z liquid handler and its 402 syringe pumps.
//!
//! [`QuadZ`] drives the controller through a [`Bus`]: simple queries are
//! immediate instructions, setters are buffered instructions, and the
//! closed-loop operations ([`move_to`](QuadZ::move_to),
//! [`move_probe`](QuadZ::move_probe) and [`pump`](QuadZ::pump)) combine the two
//! and poll until the hardware has done what it was told (or has visibly
//! stopped trying).
//!
//! All methods take `&self`, so a `QuadZ` can be shared between threads. Cached
//! probe and pump state is replaced a whole record at a time and read as
//! snapshots.
//!
//! ```rust
//! # use gsioc::{quadz::QuadZ, Probe};
//! # use std::time::Duration;
//! # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let quadz = QuadZ::open_serial("/dev/ttyUSB0")?;
//! quadz.initialize()?;
//! quadz.add_pump(0, Probe::One, Probe::Two)?;
//! quadz.move_to(100, 2000, Probe::One, Duration::from_secs(5))?;
//! quadz.pump(&[-150.0])?;
//! # Ok(())
//! # }
//! ```

mod motion;
mod options;
mod pump;

#[cfg(test)]
mod test;

pub use motion::{ArmPosition, ProbeKinematics};
pub use options::ControlOptions;

use crate::{
	bus::{BufferReady, Bus, DeviceRole, InstructionId},
	error::{DeviceNotRespondingError, Error, UnexpectedResponseError},
	syringe::ChannelMap,
	Probe,
};
use parking_lot::RwLock;

/// The power state of each motor, as reported by the controller.
///
/// Each field is the raw status letter: `U` unpowered, `P` powered, `E` error.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MotorStatus {
	/// The x motor.
	pub x: char,
	/// The y motor.
	pub y: char,
	/// The z motor of each probe.
	pub z: [char; 4],
	/// The dilutor motor (unused on a Quad-Z).
	pub pump: char,
}

/// A Quad-Z liquid handler and the syringe pumps feeding its probes.
#[derive(Debug)]
pub struct QuadZ {
	bus: Bus,
	options: ControlOptions,
	pumps: RwLock<ChannelMap>,
	kinematics: RwLock<[ProbeKinematics; 4]>,
}

impl QuadZ {
	/// Open the serial port at `path` with default bus and control options.
	///
	/// The controller still needs to be [`initialize`](QuadZ::initialize)d.
	pub fn open_serial(path: &str) -> Result<QuadZ, Error> {
		Ok(QuadZ::from_bus(Bus::open_serial(path)?, ControlOptions::new()))
	}

	/// Control a liquid handler on an already open bus.
	pub fn from_bus(bus: Bus, options: ControlOptions) -> QuadZ {
		QuadZ {
			bus,
			options,
			pumps: RwLock::new(ChannelMap::default()),
			kinematics: RwLock::new([ProbeKinematics::default(); 4]),
		}
	}

	/// The underlying bus.
	pub fn bus(&self) -> &Bus {
		&self.bus
	}

	/// The control options.
	pub fn options(&self) -> &ControlOptions {
		&self.options
	}

	/// The bus address of the liquid handler.
	pub fn address(&self) -> u8 {
		self.options.address()
	}

	/// Register the liquid handler on the bus.
	pub fn initialize(&self) -> Result<(), Error> {
		let address = self.address();
		if self.bus.register_device(address, DeviceRole::Controller) {
			log::info!("liquid handler ready at address {address}");
			Ok(())
		} else {
			Err(DeviceNotRespondingError::new(address, self.bus.max_retries()).into())
		}
	}

	/// Send an immediate command to the liquid handler.
	pub fn immediate(&self, command: &str) -> Result<String, Error> {
		self.immediate_to(self.address(), command)
	}

	/// Send an immediate command to any registered device.
	pub fn immediate_to(&self, address: u8, command: &str) -> Result<String, Error> {
		Ok(self.bus.submit_immediate(address, command)?)
	}

	/// Queue a buffered instruction for the liquid handler.
	pub fn buffered(&self, instruction: &str) -> Result<InstructionId, Error> {
		self.buffered_to(self.address(), instruction)
	}

	/// Queue a buffered instruction for any registered device.
	///
	/// The device's buffer is checked the way its registered role requires.
	pub fn buffered_to(&self, address: u8, instruction: &str) -> Result<InstructionId, Error> {
		let ready = self
			.bus
			.device(address)
			.map_or(BufferReady::Handler, |device| device.role().buffer_ready());
		Ok(self.bus.submit_buffered(address, instruction, ready)?)
	}

	/// Wait for every queued buffered instruction to be transmitted.
	///
	/// Returns the first recorded transmission failure, if any. Other recorded
	/// failures are logged and discarded.
	pub fn wait_for_buffered(&self) -> Result<(), Error> {
		self.bus.drain_buffered();
		let mut failures = self.bus.take_buffered_failures().into_iter();
		let Some(first) = failures.next() else {
			return Ok(());
		};
		for other in failures {
			log::warn!(
				"discarding failure of {:?} to {}: {}",
				other.payload(),
				other.address(),
				other.error()
			);
		}
		Err(first.into_error().into())
	}

	fn unexpected(&self, command: &str, response: &str) -> Error {
		UnexpectedResponseError::new(self.address(), command, response).into()
	}

	/// Parse a reply made of exactly `N` integers joined by `separator`.
	fn parse_ints<const N: usize>(
		&self,
		command: &str,
		reply: &str,
		separator: char,
	) -> Result<[i32; N], Error> {
		let mut values = [0; N];
		let mut parts = reply.split(separator);
		for value in &mut values {
			*value = parts
				.next()
				.and_then(|part| part.trim().parse().ok())
				.ok_or_else(|| self.unexpected(command, reply))?;
		}
		if parts.next().is_some() {
			return Err(self.unexpected(command, reply));
		}
		Ok(values)
	}

	fn query_ints<const N: usize>(&self, command: &str, separator: char) -> Result<[i32; N], Error> {
		let reply = self.immediate(command)?;
		self.parse_ints(command, &reply, separator)
	}

	fn update_kinematics<F>(&self, values: [i32; 4], mut f: F)
	where
		F: FnMut(&mut ProbeKinematics, i32),
	{
		let mut kinematics = self.kinematics.write();
		for (state, value) in kinematics.iter_mut().zip(values) {
			f(state, value);
		}
	}

	/// The last known kinematics of `probe`.
	pub fn kinematics(&self, probe: Probe) -> ProbeKinematics {
		self.kinematics.read()[probe.index()]
	}

	/// The identifier and firmware version of the liquid handler.
	pub fn version(&self) -> Result<String, Error> {
		self.immediate("%")
	}

	/// Reset the liquid handler.
	pub fn reset(&self) -> Result<String, Error> {
		self.immediate("$")
	}

	/// The code of the last error.
	pub fn last_error(&self) -> Result<i32, Error> {
		let [code] = self.query_ints("e", ',')?;
		Ok(code)
	}

	/// The liquid level sensitivity of each probe (0 is most sensitive).
	pub fn liquid_sensitivity(&self) -> Result<[i32; 4], Error> {
		let values = self.query_ints("K", ',')?;
		self.update_kinematics(values, |state, value| state.liquid_sensitivity = Some(value));
		Ok(values)
	}

	/// The speed of each probe, in micrometers per second.
	pub fn probe_speed(&self) -> Result<[i32; 4], Error> {
		let values = self.query_ints("O", ',')?;
		self.update_kinematics(values, |state, value| state.speed = Some(value));
		Ok(values)
	}

	/// The linear encoder position, in tenths of millimeters.
	pub fn encoder_position(&self) -> Result<ArmPosition, Error> {
		let [x, y] = self.query_ints("P", '/')?;
		Ok(ArmPosition { x, y })
	}

	/// The x position of each probe, in tenths of millimeters.
	pub fn probe_x_positions(&self) -> Result<[i32; 4], Error> {
		let values = self.query_ints("X", ',')?;
		self.update_kinematics(values, |state, value| state.x = Some(value));
		Ok(values)
	}

	/// The y position of the arm, in tenths of millimeters.
	pub fn y_position(&self) -> Result<i32, Error> {
		let [y] = self.query_ints("Y", ',')?;
		Ok(y)
	}

	/// The z position of each probe, in tenths of millimeters.
	pub fn probe_z_positions(&self) -> Result<[i32; 4], Error> {
		let values = self.query_ints("Z", ',')?;
		self.update_kinematics(values, |state, value| state.z = Some(value));
		Ok(values)
	}

	/// The spacing between probes, in tenths of millimeters.
	pub fn probe_width(&self) -> Result<i32, Error> {
		let [width] = self.query_ints("w", ',')?;
		Ok(width)
	}

	/// The text on the display.
	pub fn lcd_text(&self) -> Result<String, Error> {
		self.immediate("R")
	}

	/// The power state of each motor.
	pub fn motor_status(&self) -> Result<MotorStatus, Error> {
		let reply = self.immediate("m")?;
		let letters: Vec<char> = reply.chars().collect();
		match letters[..] {
			[x, y, z1, z2, z3, z4, pump] => Ok(MotorStatus {
				x,
				y,
				z: [z1, z2, z3, z4],
				pump,
			}),
			_ => Err(self.unexpected("m", &reply)),
		}
	}

	/// Home every axis.
	pub fn home(&self) -> Result<InstructionId, Error> {
		self.buffered("SH")
	}

	/// Beep at `frequency` Hz for `duration` tenths of a second.
	pub fn beep(&self, frequency: u32, duration: u32) -> Result<InstructionId, Error> {
		self.buffered(&format!("SB{frequency},{duration}"))
	}

	/// Clear the last error.
	pub fn clear_error(&self) -> Result<InstructionId, Error> {
		self.buffered("Se")
	}

	/// Relax `probe` so it can be moved by hand.
	pub fn relax_probe(&self, probe: Probe) -> Result<InstructionId, Error> {
		self.buffered(&format!("SF{}", probe.letter()))
	}

	/// Set the liquid level sensitivity of `probe` (0 is most sensitive).
	pub fn set_liquid_sensitivity(&self, probe: Probe, sensitivity: u8) -> Result<InstructionId, Error> {
		self.buffered(&format!("SK{}{sensitivity}", probe.letter()))
	}

	/// Move the arm so that `probe` is at (`x`, `y`), in tenths of millimeters.
	///
	/// This only queues the move. See [`move_to`](QuadZ::move_to) to wait for
	/// it.
	pub fn set_probe_position(&self, probe: Probe, x: i32, y: i32) -> Result<InstructionId, Error> {
		self.buffered(&format!("SX{}{x}/{y}", probe.letter()))
	}

	/// Move the arm to `y`, in tenths of millimeters.
	pub fn set_y_position(&self, y: i32) -> Result<InstructionId, Error> {
		self.buffered(&format!("SY{y}"))
	}

	/// Stage a z target for `probe`, optionally stopping at the liquid
	/// surface. The move starts with [`start_probe_move`](QuadZ::start_probe_move).
	pub fn set_probe_z(&self, probe: Probe, z: i32, liquid_level: bool) -> Result<InstructionId, Error> {
		let op = if liquid_level { 'z' } else { 'Z' };
		self.buffered(&format!("S{op}{}{z}", probe.letter()))
	}

	/// Start moving every probe with a staged z target.
	pub fn start_probe_move(&self, liquid_level: bool) -> Result<InstructionId, Error> {
		self.buffered(if liquid_level { "Sm" } else { "SM" })
	}

	/// Set the text on the display.
	pub fn set_lcd_text(&self, text: &str) -> Result<InstructionId, Error> {
		self.buffered(&format!("SW{text}"))
	}

	/// Set the spacing between probes, in tenths of millimeters.
	pub fn set_probe_width(&self, width: i32) -> Result<InstructionId, Error> {
		self.buffered(&format!("Sw{width}"))
	}
}

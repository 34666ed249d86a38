//! An in-memory GSIOC bus with simulated devices.
//!
//! A [`SimBus`] plays the device side of the protocol byte by byte: it answers
//! handshakes for the addresses it hosts, streams immediate responses one
//! acknowledged byte at a time, and echoes buffered frames before handing them
//! to the addressed device. Plug it into a [`Mock`] backend with
//! [`SimBus::into_mock`].
//!
//! ```rust
//! # use gsioc::{bus::{BusOptions, DeviceRole}, sim::{SimBus, SimController}};
//! # use std::time::Duration;
//! # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let sim = SimBus::new().with_device(22, SimController::new());
//! let transcript = sim.transcript();
//! let bus = BusOptions::new()
//!     .settle_delay(Duration::ZERO)
//!     .disconnect_delay(Duration::ZERO)
//!     .open_backend(sim.into_mock())?;
//! assert!(bus.register_device(22, DeviceRole::Controller));
//! assert!(bus.submit_immediate(22, "%")?.starts_with("Quad-Z"));
//! assert_eq!(transcript.immediates(22), vec!['%']);
//! # Ok(())
//! # }
//! ```

use crate::{
	backend::{Mock, Responder},
	bus::link::{address_byte, ACK, CR, DISCONNECT, END_OF_RESPONSE, LF},
	syringe::{Side, SyringeStatus, Valve},
	Probe,
};
use parking_lot::Mutex;
use std::{
	collections::{BTreeMap, VecDeque},
	fmt,
	sync::Arc,
};

/// The device side of the protocol, after framing has been handled.
pub trait SimDevice: Send {
	/// Answer an immediate command. The reply must not be empty.
	fn immediate(&mut self, command: char) -> String;
	/// Execute a buffered instruction (without its framing).
	fn buffered(&mut self, instruction: &str);
}

/// Shared devices let a test inspect the device after handing it to the bus.
impl<T: SimDevice> SimDevice for Arc<Mutex<T>> {
	fn immediate(&mut self, command: char) -> String {
		self.lock().immediate(command)
	}
	fn buffered(&mut self, instruction: &str) {
		self.lock().buffered(instruction);
	}
}

/// Something that happened on a simulated bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
	/// The disconnect byte was received.
	Disconnected,
	/// A device acknowledged its address.
	Connected(u8),
	/// A device received an immediate command.
	Immediate {
		/// The device's address.
		address: u8,
		/// The command.
		command: char,
		/// The full response the device started sending.
		response: String,
	},
	/// A device received a complete buffered instruction.
	Buffered {
		/// The device's address.
		address: u8,
		/// The instruction without its framing.
		instruction: String,
	},
}

/// A shared, growing record of the [`Event`]s on a [`SimBus`].
#[derive(Debug, Clone, Default)]
pub struct Transcript(Arc<Mutex<Vec<Event>>>);

impl Transcript {
	fn push(&self, event: Event) {
		self.0.lock().push(event);
	}

	/// Every event so far.
	pub fn events(&self) -> Vec<Event> {
		self.0.lock().clone()
	}

	/// Forget all events so far.
	pub fn clear(&self) {
		self.0.lock().clear();
	}

	/// The buffered instructions received so far, with the receiving address.
	pub fn buffered(&self) -> Vec<(u8, String)> {
		self.0
			.lock()
			.iter()
			.filter_map(|event| match event {
				Event::Buffered {
					address,
					instruction,
				} => Some((*address, instruction.clone())),
				_ => None,
			})
			.collect()
	}

	/// The immediate commands received by `address` so far.
	pub fn immediates(&self, address: u8) -> Vec<char> {
		self.0
			.lock()
			.iter()
			.filter_map(|event| match event {
				Event::Immediate {
					address: a,
					command,
					..
				} if *a == address => Some(*command),
				_ => None,
			})
			.collect()
	}
}

enum Mode {
	Idle,
	/// Streaming an immediate response; `next` is the index of the next byte.
	Responding { response: Vec<u8>, next: usize },
	/// Receiving (and echoing) a buffered frame.
	Framing { frame: Vec<u8> },
}

/// A simulated GSIOC bus hosting any number of [`SimDevice`]s.
pub struct SimBus {
	devices: BTreeMap<u8, Box<dyn SimDevice>>,
	/// Handshakes to ignore per address before answering
	refusals: BTreeMap<u8, usize>,
	connected: Option<u8>,
	mode: Mode,
	transcript: Transcript,
}

impl SimBus {
	/// Create a bus with no devices.
	pub fn new() -> Self {
		SimBus {
			devices: BTreeMap::new(),
			refusals: BTreeMap::new(),
			connected: None,
			mode: Mode::Idle,
			transcript: Transcript::default(),
		}
	}

	/// Host `device` at `address`.
	#[must_use]
	pub fn with_device<D: SimDevice + 'static>(mut self, address: u8, device: D) -> Self {
		self.devices.insert(address, Box::new(device));
		self
	}

	/// Ignore the first `count` handshakes addressed to `address`.
	#[must_use]
	pub fn refuse_handshakes(mut self, address: u8, count: usize) -> Self {
		self.refusals.insert(address, count);
		self
	}

	/// A handle to this bus's event record.
	pub fn transcript(&self) -> Transcript {
		self.transcript.clone()
	}

	/// Wrap the bus in a [`Mock`] backend.
	pub fn into_mock(self) -> Mock {
		Mock::with_responder(self)
	}

	fn start_response(&mut self, address: u8, command: char, rx: &mut VecDeque<u8>) {
		let Some(device) = self.devices.get_mut(&address) else {
			return;
		};
		let response = device.immediate(command);
		self.transcript.push(Event::Immediate {
			address,
			command,
			response: response.clone(),
		});
		self.mode = Mode::Responding {
			response: response.into_bytes(),
			next: 0,
		};
		self.send_next(rx);
	}

	fn send_next(&mut self, rx: &mut VecDeque<u8>) {
		let Mode::Responding { response, next } = &mut self.mode else {
			return;
		};
		let Some(&byte) = response.get(*next) else {
			self.mode = Mode::Idle;
			return;
		};
		*next += 1;
		if *next == response.len() {
			rx.push_back(byte | END_OF_RESPONSE);
			self.mode = Mode::Idle;
		} else {
			rx.push_back(byte);
		}
	}
}

impl Default for SimBus {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for SimBus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SimBus")
			.field("devices", &self.devices.keys().collect::<Vec<_>>())
			.field("connected", &self.connected)
			.finish_non_exhaustive()
	}
}

impl Responder for SimBus {
	fn on_byte(&mut self, byte: u8, rx: &mut VecDeque<u8>) {
		if byte == DISCONNECT {
			self.connected = None;
			self.mode = Mode::Idle;
			self.transcript.push(Event::Disconnected);
			return;
		}
		if byte & END_OF_RESPONSE != 0 {
			let address = byte & !END_OF_RESPONSE;
			self.connected = None;
			self.mode = Mode::Idle;
			if let Some(refusals) = self.refusals.get_mut(&address) {
				if *refusals > 0 {
					*refusals -= 1;
					return;
				}
			}
			if self.devices.contains_key(&address) {
				debug_assert_eq!(address_byte(address), byte);
				self.connected = Some(address);
				self.transcript.push(Event::Connected(address));
				rx.push_back(byte);
			}
			return;
		}
		// Unselected devices ignore the bus.
		let Some(address) = self.connected else {
			return;
		};
		if let Mode::Framing { frame } = &mut self.mode {
			rx.push_back(byte);
			if byte != CR {
				frame.push(byte);
				return;
			}
			let instruction = String::from_utf8_lossy(frame).into_owned();
			self.mode = Mode::Idle;
			if let Some(device) = self.devices.get_mut(&address) {
				device.buffered(&instruction);
			}
			self.transcript.push(Event::Buffered {
				address,
				instruction,
			});
			return;
		}
		let responding = matches!(self.mode, Mode::Responding { .. });
		match byte {
			ACK if responding => self.send_next(rx),
			// A stray acknowledgement is ignored.
			ACK => {}
			LF => {
				rx.push_back(LF);
				self.mode = Mode::Framing { frame: Vec::new() };
			}
			_ => self.start_response(address, char::from(byte), rx),
		}
	}
}

/// How the simulated controller's axes respond to move commands.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Motion {
	/// Axes reach their targets as soon as the command is received.
	Instant,
	/// Each position query advances the queried axes by this many units.
	Stepped(i32),
	/// Axes never move.
	Stalled,
}

fn step_toward(current: &mut i32, target: i32, motion: Motion) {
	match motion {
		Motion::Instant => *current = target,
		Motion::Stepped(step) => {
			let delta = (target - *current).clamp(-step, step);
			*current += delta;
		}
		Motion::Stalled => {}
	}
}

fn join<T: ToString>(values: &[T]) -> String {
	values
		.iter()
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join(",")
}

fn probe_from_letter(letter: char) -> Option<Probe> {
	Probe::ALL.into_iter().find(|probe| probe.letter() == letter)
}

/// A simulated Quad-Z liquid handler.
#[derive(Debug, Clone)]
pub struct SimController {
	version: String,
	motion: Motion,
	/// Probe spacing
	width: i32,
	/// Arm x (at probe 1) and y
	arm: (i32, i32),
	arm_target: (i32, i32),
	z: [i32; 4],
	/// Set by `SZ`/`Sz`, applied by `SM`/`Sm`
	z_staged: [Option<i32>; 4],
	z_target: [Option<i32>; 4],
	stalled_probes: [bool; 4],
	sensitivity: [i32; 4],
	speed: [i32; 4],
	lcd: String,
	last_error: i32,
	/// Buffer status polls to answer as busy
	busy_polls: usize,
}

impl SimController {
	/// Create a controller with its arm at the origin and instant motion.
	pub fn new() -> Self {
		SimController {
			version: "Quad-Z 215 v1.30".to_string(),
			motion: Motion::Instant,
			width: 90,
			arm: (0, 0),
			arm_target: (0, 0),
			z: [0; 4],
			z_staged: [None; 4],
			z_target: [None; 4],
			stalled_probes: [false; 4],
			sensitivity: [10; 4],
			speed: [100; 4],
			lcd: String::new(),
			last_error: 0,
			busy_polls: 0,
		}
	}

	/// Set how the axes respond to moves.
	#[must_use]
	pub fn with_motion(mut self, motion: Motion) -> Self {
		self.motion = motion;
		self
	}

	/// Answer the next `count` buffer status polls as busy.
	#[must_use]
	pub fn with_busy_buffer(mut self, count: usize) -> Self {
		self.busy_polls = count;
		self
	}

	/// Make `probe` ignore z moves.
	#[must_use]
	pub fn with_stalled_probe(mut self, probe: Probe) -> Self {
		self.stalled_probes[probe.index()] = true;
		self
	}

	/// Change the motion mode.
	pub fn set_motion(&mut self, motion: Motion) {
		self.motion = motion;
	}

	/// The x position of every probe.
	pub fn probe_x(&self) -> [i32; 4] {
		let mut x = [0; 4];
		for (i, value) in (0i32..).zip(x.iter_mut()) {
			*value = self.arm.0 + i * self.width;
		}
		x
	}

	/// The y position of the arm.
	pub fn y(&self) -> i32 {
		self.arm.1
	}

	/// The z position of every probe.
	pub fn z(&self) -> [i32; 4] {
		self.z
	}

	/// The text on the display.
	pub fn lcd(&self) -> &str {
		&self.lcd
	}

	fn advance_z(&mut self) {
		for (i, target) in self.z_target.iter_mut().enumerate() {
			let Some(goal) = *target else { continue };
			if self.stalled_probes[i] {
				continue;
			}
			step_toward(&mut self.z[i], goal, self.motion);
			if self.z[i] == goal {
				*target = None;
			}
		}
	}
}

impl Default for SimController {
	fn default() -> Self {
		Self::new()
	}
}

impl SimDevice for SimController {
	fn immediate(&mut self, command: char) -> String {
		match command {
			'%' => self.version.clone(),
			'$' => "$".to_string(),
			'e' => self.last_error.to_string(),
			'K' => join(&self.sensitivity),
			'O' => join(&self.speed),
			'P' => format!("{}/{}", self.arm.0, self.arm.1),
			'X' => {
				step_toward(&mut self.arm.0, self.arm_target.0, self.motion);
				join(&self.probe_x())
			}
			'Y' => {
				step_toward(&mut self.arm.1, self.arm_target.1, self.motion);
				self.arm.1.to_string()
			}
			'Z' => {
				self.advance_z();
				join(&self.z)
			}
			'w' => self.width.to_string(),
			'R' => {
				if self.lcd.is_empty() {
					" ".to_string()
				} else {
					self.lcd.clone()
				}
			}
			'm' => "PPPPPPU".to_string(),
			'S' => {
				if self.busy_polls > 0 {
					self.busy_polls -= 1;
					"*".to_string()
				} else {
					"|".to_string()
				}
			}
			_ => "#".to_string(),
		}
	}

	fn buffered(&mut self, instruction: &str) {
		let mut chars = instruction.chars();
		if chars.next() != Some('S') {
			self.last_error = 1;
			return;
		}
		let Some(op) = chars.next() else { return };
		let args = chars.as_str();
		let probe_arg = || {
			let mut chars = args.chars();
			let probe = chars.next().and_then(probe_from_letter)?;
			Some((probe, chars.as_str()))
		};
		match op {
			'H' => {
				self.arm = (0, 0);
				self.arm_target = (0, 0);
				self.z = [0; 4];
				self.z_target = [None; 4];
			}
			'e' => self.last_error = 0,
			'K' => {
				if let Some((probe, value)) = probe_arg() {
					if let Ok(value) = value.parse() {
						self.sensitivity[probe.index()] = value;
					}
				}
			}
			'X' => {
				let parsed = probe_arg().and_then(|(probe, rest)| {
					let (x, y) = rest.split_once('/')?;
					Some((probe, x.parse::<i32>().ok()?, y.parse::<i32>().ok()?))
				});
				if let Some((probe, x, y)) = parsed {
					let offset = i32::from(probe.number() - 1) * self.width;
					self.arm_target = (x - offset, y);
					if self.motion == Motion::Instant {
						self.arm = self.arm_target;
					}
				}
			}
			'Y' => {
				if let Ok(y) = args.parse() {
					self.arm_target.1 = y;
					if self.motion == Motion::Instant {
						self.arm.1 = y;
					}
				}
			}
			'Z' | 'z' => {
				if let Some((probe, z)) = probe_arg() {
					if let Ok(z) = z.parse() {
						self.z_staged[probe.index()] = Some(z);
					}
				}
			}
			'M' | 'm' => {
				for (staged, target) in self.z_staged.iter_mut().zip(&mut self.z_target) {
					if let Some(z) = staged.take() {
						*target = Some(z);
					}
				}
				if self.motion == Motion::Instant {
					self.advance_z();
				}
			}
			'W' => self.lcd = args.to_string(),
			'w' => {
				if let Ok(width) = args.parse() {
					self.width = width;
				}
			}
			// Beep, relax and the like have no observable effect.
			_ => {}
		}
	}
}

#[derive(Debug, Clone)]
struct SimSyringe {
	status: SyringeStatus,
	volume: f64,
	/// Signed volume of the operation set by `A`/`D`
	pending: f64,
	size: u32,
	valve: Valve,
	/// A valve change and the number of valve queries until it completes
	valve_change: Option<(Valve, u32)>,
	/// Status queries until the current operation completes
	polls_left: u32,
	stalled: bool,
	flow_rate: String,
	force: u8,
}

impl SimSyringe {
	fn new() -> Self {
		SimSyringe {
			status: SyringeStatus::Ready,
			volume: 0.0,
			pending: 0.0,
			size: 0,
			valve: Valve::Needle,
			valve_change: None,
			polls_left: 0,
			stalled: false,
			flow_rate: "10".to_string(),
			force: 3,
		}
	}

	fn advance(&mut self) {
		match self.status {
			SyringeStatus::Running => {
				self.polls_left = self.polls_left.saturating_sub(1);
				if self.polls_left == 0 {
					let delivered = if self.stalled {
						self.pending / 2.0
					} else {
						self.pending
					};
					self.volume = (self.volume + delivered).max(0.0);
					self.pending = 0.0;
					self.status = SyringeStatus::Ready;
				}
			}
			SyringeStatus::Initializing => {
				self.polls_left = self.polls_left.saturating_sub(1);
				if self.polls_left == 0 {
					self.volume = 0.0;
					self.status = SyringeStatus::Ready;
				}
			}
			_ => {}
		}
	}

	fn advance_valve(&mut self) {
		if let Some((valve, polls)) = self.valve_change {
			if polls <= 1 {
				self.valve = valve;
				self.valve_change = None;
			} else {
				self.valve_change = Some((valve, polls - 1));
			}
		}
	}
}

/// A simulated 402 dual syringe pump.
#[derive(Debug, Clone)]
pub struct SimPump {
	version: String,
	syringes: [SimSyringe; 2],
	/// Status queries a started syringe reports as running
	run_polls: u32,
	/// Status queries an initializing syringe reports as initializing
	init_polls: u32,
	/// Valve queries before a valve change completes
	valve_polls: u32,
}

impl SimPump {
	/// Create an idle pump with empty syringes.
	pub fn new() -> Self {
		SimPump {
			version: "402v1.20".to_string(),
			syringes: [SimSyringe::new(), SimSyringe::new()],
			run_polls: 2,
			init_polls: 2,
			valve_polls: 1,
		}
	}

	fn syringe(&self, side: Side) -> &SimSyringe {
		&self.syringes[side_index(side)]
	}

	fn syringe_mut(&mut self, side: Side) -> &mut SimSyringe {
		&mut self.syringes[side_index(side)]
	}

	/// Report a different version string (to simulate another device model).
	#[must_use]
	pub fn with_version(mut self, version: &str) -> Self {
		self.version = version.to_string();
		self
	}

	/// Start with `volume` µL in the `side` syringe.
	#[must_use]
	pub fn with_volume(mut self, side: Side, volume: f64) -> Self {
		self.syringe_mut(side).volume = volume;
		self
	}

	/// Set the number of status queries a started syringe reports as running.
	#[must_use]
	pub fn with_run_polls(mut self, polls: u32) -> Self {
		self.run_polls = polls;
		self
	}

	/// Set the number of valve queries before a valve change completes.
	#[must_use]
	pub fn with_valve_polls(mut self, polls: u32) -> Self {
		self.valve_polls = polls;
		self
	}

	/// Make the `side` plunger stop halfway through every transfer.
	#[must_use]
	pub fn with_stalled(mut self, side: Side) -> Self {
		self.syringe_mut(side).stalled = true;
		self
	}

	/// The volume in the `side` syringe.
	pub fn volume(&self, side: Side) -> f64 {
		self.syringe(side).volume
	}

	/// The valve position of the `side` syringe.
	pub fn valve(&self, side: Side) -> Valve {
		self.syringe(side).valve
	}

	/// The status of the `side` syringe.
	pub fn status(&self, side: Side) -> SyringeStatus {
		self.syringe(side).status
	}

	/// The configured size of the `side` syringe.
	pub fn syringe_size(&self, side: Side) -> u32 {
		self.syringe(side).size
	}

	/// The configured flow rate of the `side` syringe, as received.
	pub fn flow_rate(&self, side: Side) -> &str {
		&self.syringe(side).flow_rate
	}

	/// The configured motor force of the `side` syringe.
	pub fn motor_force(&self, side: Side) -> u8 {
		self.syringe(side).force
	}
}

impl Default for SimPump {
	fn default() -> Self {
		Self::new()
	}
}

fn side_index(side: Side) -> usize {
	match side {
		Side::Left => 0,
		Side::Right => 1,
	}
}

fn sides(letter: char) -> &'static [Side] {
	match letter {
		'L' => &[Side::Left],
		'R' => &[Side::Right],
		'B' => &[Side::Left, Side::Right],
		_ => &[],
	}
}

impl SimDevice for SimPump {
	fn immediate(&mut self, command: char) -> String {
		match command {
			'%' => self.version.clone(),
			'$' => "$".to_string(),
			'M' => {
				for syringe in &mut self.syringes {
					syringe.advance();
				}
				let [left, right] = &self.syringes;
				format!(
					"{}{:.1}{}{:.1}",
					left.status, left.volume, right.status, right.volume
				)
			}
			'V' => {
				for syringe in &mut self.syringes {
					syringe.advance_valve();
				}
				let [left, right] = &self.syringes;
				format!("{}{}", left.valve.letter(), right.valve.letter())
			}
			'S' => "00".to_string(),
			_ => "#".to_string(),
		}
	}

	fn buffered(&mut self, instruction: &str) {
		let mut chars = instruction.chars();
		let (Some(op), Some(target)) = (chars.next(), chars.next()) else {
			return;
		};
		let args = chars.as_str();
		let (run_polls, init_polls, valve_polls) = (self.run_polls, self.init_polls, self.valve_polls);
		for &side in sides(target) {
			let syringe = self.syringe_mut(side);
			match op {
				'A' | 'D' => {
					if let Ok(volume) = args.parse::<f64>() {
						syringe.pending = if op == 'A' { volume } else { -volume };
						syringe.status = SyringeStatus::Holding;
					}
				}
				'B' => {
					if syringe.status == SyringeStatus::Holding {
						syringe.status = SyringeStatus::Running;
						syringe.polls_left = run_polls;
					}
				}
				'N' => {
					if syringe.status == SyringeStatus::Running {
						syringe.status = SyringeStatus::Ready;
						syringe.pending = 0.0;
					}
				}
				'O' => {
					syringe.status = SyringeStatus::Initializing;
					syringe.polls_left = init_polls;
				}
				'P' => {
					if let Ok(size) = args.parse() {
						syringe.size = size;
					}
				}
				'S' => syringe.flow_rate = args.to_string(),
				'F' => {
					if let Ok(force) = args.parse() {
						syringe.force = force;
					}
				}
				'V' => {
					if let Some(valve) = args.chars().next().and_then(Valve::from_letter) {
						if valve_polls == 0 {
							syringe.valve = valve;
						} else {
							syringe.valve_change = Some((valve, valve_polls));
						}
					}
				}
				// Synchronization has no observable effect.
				_ => {}
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn exchange(sim: &mut SimBus, bytes: &[u8]) -> Vec<u8> {
		let mut rx = VecDeque::new();
		for &byte in bytes {
			sim.on_byte(byte, &mut rx);
		}
		rx.into_iter().collect()
	}

	#[test]
	fn immediate_response_is_acknowledged_byte_by_byte() {
		let mut sim = SimBus::new().with_device(22, SimController::new());
		assert_eq!(exchange(&mut sim, &[DISCONNECT, 22 + 128]), vec![22 + 128]);
		assert_eq!(exchange(&mut sim, b"w"), vec![b'9']);
		assert_eq!(exchange(&mut sim, &[ACK]), vec![b'0' | END_OF_RESPONSE]);
		// Nothing more to send.
		assert_eq!(exchange(&mut sim, &[ACK]), Vec::<u8>::new());
	}

	#[test]
	fn buffered_frames_are_echoed_and_executed() {
		let controller = Arc::new(Mutex::new(SimController::new()));
		let mut sim = SimBus::new().with_device(22, Arc::clone(&controller));
		let transcript = sim.transcript();
		exchange(&mut sim, &[DISCONNECT, 22 + 128]);
		let frame = b"\nSWhello\r";
		assert_eq!(exchange(&mut sim, frame), frame.to_vec());
		assert_eq!(controller.lock().lcd(), "hello");
		assert_eq!(transcript.buffered(), vec![(22, "SWhello".to_string())]);
	}

	#[test]
	fn absent_and_refusing_devices_stay_silent() {
		let mut sim = SimBus::new()
			.with_device(3, SimPump::new())
			.refuse_handshakes(3, 1);
		assert!(exchange(&mut sim, &[4 + 128]).is_empty());
		assert!(exchange(&mut sim, &[3 + 128]).is_empty());
		assert_eq!(exchange(&mut sim, &[3 + 128]), vec![3 + 128]);
		// Unselected devices ignore commands.
		exchange(&mut sim, &[DISCONNECT]);
		assert!(exchange(&mut sim, b"%").is_empty());
	}

	#[test]
	fn pump_transfers_volume_after_start() {
		let mut pump = SimPump::new().with_volume(Side::Left, 200.0);
		pump.buffered("DL150.0");
		assert_eq!(pump.status(Side::Left), SyringeStatus::Holding);
		pump.buffered("BB");
		assert_eq!(pump.immediate('M'), "R200.0N0.0");
		assert_eq!(pump.immediate('M'), "N50.0N0.0");
		assert_eq!(pump.volume(Side::Left), 50.0);
	}

	#[test]
	fn controller_steps_toward_target() {
		let mut controller = SimController::new().with_motion(Motion::Stepped(40));
		controller.buffered("SXb300/20");
		assert_eq!(controller.immediate('X'), "40,130,220,310");
		assert_eq!(controller.immediate('Y'), "20");
		for _ in 0..5 {
			controller.immediate('X');
		}
		assert_eq!(controller.probe_x()[1], 300);
	}
}

//! 402 syringe pump operations and the fluid-transfer loop.

use super::QuadZ;
use crate::{
	bus::{DeviceRole, InstructionId},
	error::{
		DeviceNotRespondingError, Error, ProbeNotAssignedError, UnexpectedResponseError,
		VolumeError,
	},
	syringe::{
		format_volume, parse_global_status, parse_pump_status, parse_valves, GlobalStatus,
		PumpChannel, PumpChannelState, Side, SyringeStatus, Target, Valve,
	},
	Probe,
};
use std::{io, thread, time::Instant};

/// A validated transfer for one probe.
#[derive(Debug, Copy, Clone)]
struct Transfer {
	probe: Probe,
	/// Positive dispenses
	volume: f64,
	expected: f64,
}

impl QuadZ {
	/// Register the 402 syringe pump at `address`, whose left syringe feeds
	/// `left` and right syringe feeds `right`.
	///
	/// Fails with an `UnexpectedResponse` error if the device does not
	/// identify itself as a 402.
	pub fn add_pump(&self, address: u8, left: Probe, right: Probe) -> Result<(), Error> {
		if left == right {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("both sides of pump {address} cannot feed probe {left}"),
			)
			.into());
		}
		if !self
			.bus
			.register_device(address, DeviceRole::Pump { left, right })
		{
			return Err(DeviceNotRespondingError::new(address, self.bus.max_retries()).into());
		}
		let version = self.immediate_to(address, "%")?;
		if !version.starts_with("402") {
			return Err(UnexpectedResponseError::new(address, "%", &version).into());
		}
		self.pumps.write().assign(address, left, right);
		log::info!("402 pump {address} ({version}) feeds probes {left} and {right}");
		Ok(())
	}

	fn channel(&self, probe: Probe) -> Result<PumpChannel, Error> {
		self.pumps
			.read()
			.channel(probe)
			.ok_or_else(|| ProbeNotAssignedError::new(probe).into())
	}

	/// The cached state of the syringe feeding `probe`.
	pub fn channel_state(&self, probe: Probe) -> Option<PumpChannelState> {
		self.pumps.read().state(probe).cloned()
	}

	/// The probes a command for `probe` applies to.
	fn targets(channel: PumpChannel, probe: Probe, target: Target) -> Vec<Probe> {
		[Side::Left, Side::Right]
			.into_iter()
			.filter(|&side| target.includes(side))
			.map(|side| channel.probe_on(probe, side))
			.collect()
	}

	fn pump_command(&self, channel: PumpChannel, command: &str) -> Result<InstructionId, Error> {
		self.buffered_to(channel.address, command)
	}

	/// Reset the pump feeding `probe`.
	pub fn reset_pump(&self, probe: Probe) -> Result<String, Error> {
		let channel = self.channel(probe)?;
		self.immediate_to(channel.address, "$")
	}

	/// Query both syringes of the pump feeding `probe`, refreshing the cached
	/// state of both, and return the state of `probe`'s syringe.
	pub fn pump_status(&self, probe: Probe) -> Result<(SyringeStatus, f64), Error> {
		let channel = self.channel(probe)?;
		let reply = self.immediate_to(channel.address, "M")?;
		let sides = parse_pump_status(&reply)
			.ok_or_else(|| UnexpectedResponseError::new(channel.address, "M", &reply))?;
		let mut pumps = self.pumps.write();
		for (side, (status, volume)) in [Side::Left, Side::Right].into_iter().zip(sides) {
			pumps.update(channel.probe_on(probe, side), |state| {
				state.status = status;
				state.current_volume = volume;
			});
		}
		Ok(if channel.side == Side::Left {
			sides[0]
		} else {
			sides[1]
		})
	}

	/// The buffer and error flags of the pump feeding `probe`.
	pub fn global_status(&self, probe: Probe) -> Result<GlobalStatus, Error> {
		let channel = self.channel(probe)?;
		let reply = self.immediate_to(channel.address, "S")?;
		parse_global_status(&reply)
			.ok_or_else(|| UnexpectedResponseError::new(channel.address, "S", &reply).into())
	}

	/// Query both valves of the pump feeding `probe`, refreshing the cached
	/// state of both, and return the position of `probe`'s valve.
	pub fn valve_status(&self, probe: Probe) -> Result<Valve, Error> {
		let channel = self.channel(probe)?;
		let reply = self.immediate_to(channel.address, "V")?;
		let valves = parse_valves(&reply)
			.ok_or_else(|| UnexpectedResponseError::new(channel.address, "V", &reply))?;
		let mut pumps = self.pumps.write();
		for (side, valve) in [Side::Left, Side::Right].into_iter().zip(valves) {
			pumps.update(channel.probe_on(probe, side), |state| state.valve = valve);
		}
		Ok(if channel.side == Side::Left {
			valves[0]
		} else {
			valves[1]
		})
	}

	/// Poll the syringe feeding each of `probes` until `done` accepts its
	/// status.
	fn wait_for_status<F>(&self, probes: &[Probe], done: F) -> Result<(), Error>
	where
		F: Fn(SyringeStatus) -> bool,
	{
		self.wait_for_buffered()?;
		for &probe in probes {
			loop {
				let (status, _) = self.pump_status(probe)?;
				if done(status) {
					break;
				}
				thread::sleep(self.options.poll());
			}
		}
		Ok(())
	}

	fn set_volume(&self, probe: Probe, op: char, volume: f64, block: bool) -> Result<(), Error> {
		let channel = self.channel(probe)?;
		let command = format!("{op}{}{}", channel.side.letter(), format_volume(volume));
		self.pump_command(channel, &command)?;
		let pending = if op == 'A' { -volume } else { volume };
		self.pumps
			.write()
			.update(probe, |state| state.pending_volume = pending);
		if block {
			self.wait_for_status(&[probe], |status| status == SyringeStatus::Holding)?;
		}
		Ok(())
	}

	/// Set the volume (µL) the syringe feeding `probe` will draw in when next
	/// started, optionally waiting until the pump holds it.
	pub fn set_aspirate_volume(&self, probe: Probe, volume: f64, block: bool) -> Result<(), Error> {
		self.set_volume(probe, 'A', volume, block)
	}

	/// Set the volume (µL) the syringe feeding `probe` will push out when
	/// next started, optionally waiting until the pump holds it.
	pub fn set_dispense_volume(&self, probe: Probe, volume: f64, block: bool) -> Result<(), Error> {
		self.set_volume(probe, 'D', volume, block)
	}

	/// Start the syringe feeding `probe` (or both syringes of its pump),
	/// optionally waiting until they stop running.
	pub fn start_pump(&self, probe: Probe, both: bool, block: bool) -> Result<(), Error> {
		let channel = self.channel(probe)?;
		let target = Target::new(channel.side, both);
		self.pump_command(channel, &format!("B{}", target.letter()))?;
		if block {
			let probes = Self::targets(channel, probe, target);
			self.wait_for_status(&probes, |status| status != SyringeStatus::Running)?;
			let mut pumps = self.pumps.write();
			for probe in probes {
				pumps.update(probe, |state| state.pending_volume = 0.0);
			}
		}
		Ok(())
	}

	/// Stop the syringe feeding `probe` (or both syringes of its pump).
	pub fn halt_pump(&self, probe: Probe, both: bool) -> Result<(), Error> {
		let channel = self.channel(probe)?;
		let target = Target::new(channel.side, both);
		self.pump_command(channel, &format!("N{}", target.letter()))?;
		let mut pumps = self.pumps.write();
		for probe in Self::targets(channel, probe, target) {
			pumps.update(probe, |state| state.pending_volume = 0.0);
		}
		Ok(())
	}

	/// Initialize the syringe feeding `probe` (or both syringes of its pump),
	/// optionally waiting until they finish.
	pub fn initialize_syringe(&self, probe: Probe, both: bool, block: bool) -> Result<(), Error> {
		let channel = self.channel(probe)?;
		let target = Target::new(channel.side, both);
		self.pump_command(channel, &format!("O{}", target.letter()))?;
		if block {
			let probes = Self::targets(channel, probe, target);
			self.wait_for_status(&probes, |status| status != SyringeStatus::Initializing)?;
		}
		Ok(())
	}

	/// Set the size (µL) of the syringe feeding `probe` (or both syringes of
	/// its pump).
	pub fn set_syringe_size(&self, probe: Probe, size: u32, both: bool) -> Result<(), Error> {
		let channel = self.channel(probe)?;
		let target = Target::new(channel.side, both);
		self.pump_command(channel, &format!("P{}{size}", target.letter()))?;
		let mut pumps = self.pumps.write();
		for probe in Self::targets(channel, probe, target) {
			pumps.update(probe, |state| state.syringe_size = size);
		}
		Ok(())
	}

	/// Set the flow rate (mL/min) of the syringe feeding `probe`.
	pub fn set_flow_rate(&self, probe: Probe, rate: f64) -> Result<(), Error> {
		let channel = self.channel(probe)?;
		self.pump_command(channel, &format!("S{}{rate}", channel.side.letter()))?;
		self.pumps
			.write()
			.update(probe, |state| state.flow_rate = rate);
		Ok(())
	}

	/// Set the motor force of the syringe feeding `probe`.
	pub fn set_motor_force(&self, probe: Probe, force: u8) -> Result<(), Error> {
		let channel = self.channel(probe)?;
		self.pump_command(channel, &format!("F{}{force}", channel.side.letter()))?;
		self.pumps
			.write()
			.update(probe, |state| state.motor_force = force);
		Ok(())
	}

	/// Synchronize the syringe feeding `probe`.
	pub fn synchronize_pump(&self, probe: Probe) -> Result<(), Error> {
		let channel = self.channel(probe)?;
		self.pump_command(channel, &format!("T{}", channel.side.letter()))?;
		Ok(())
	}

	/// Switch the valve of the syringe feeding `probe`, optionally waiting
	/// until the pump reports the new position.
	pub fn set_valve(&self, probe: Probe, valve: Valve, block: bool) -> Result<(), Error> {
		let channel = self.channel(probe)?;
		self.pump_command(
			channel,
			&format!("V{}{}", channel.side.letter(), valve.letter()),
		)?;
		if block {
			self.wait_for_buffered()?;
			while self.valve_status(probe)? != valve {
				thread::sleep(self.options.poll());
			}
		}
		Ok(())
	}

	/// Switch the valves of probes 1 to 4 in turn, waiting for each. `None`
	/// leaves a valve alone.
	pub fn set_valves(&self, valves: &[Option<Valve>]) -> Result<(), Error> {
		for (probe, valve) in Probe::ALL.into_iter().zip(valves) {
			if let Some(valve) = *valve {
				self.set_valve(probe, valve, true)?;
			}
		}
		Ok(())
	}

	/// Transfer fluid through probes 1 to 4 at once.
	///
	/// `volumes[i]` is the signed volume (µL) for probe `i + 1`: positive
	/// values dispense (the syringe empties by that much) and negative values
	/// aspirate (the syringe fills). Zero entries are skipped. More than four
	/// volumes, or a volume that is not finite, is an `InvalidInput` error.
	///
	/// **Note:** the instrument's documentation flags this sign convention as
	/// possibly backwards. It is kept as the instrument has always behaved, so
	/// check the direction before running a new protocol.
	///
	/// Every transfer is validated against the syringe's reported volume and
	/// configured size before any command is sent, so a `VolumeError` here
	/// leaves every pump untouched. The volumes are then set, every pump is
	/// started at once, and each syringe is polled until it reaches its
	/// expected volume. A syringe that stops elsewhere is reported with a
	/// `VolumeError`.
	pub fn pump(&self, volumes: &[f64]) -> Result<(), Error> {
		if volumes.len() > Probe::ALL.len() {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("{} volumes given for {} probes", volumes.len(), Probe::ALL.len()),
			)
			.into());
		}
		if let Some(volume) = volumes.iter().find(|volume| !volume.is_finite()) {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("cannot transfer {volume} uL"),
			)
			.into());
		}
		let mut transfers = Vec::new();
		for (probe, &volume) in Probe::ALL.into_iter().zip(volumes) {
			if volume.abs() < f64::EPSILON {
				continue;
			}
			self.channel(probe)?;
			let (_, current) = self.pump_status(probe)?;
			let size = self
				.channel_state(probe)
				.map_or(0, |state| state.syringe_size);
			let expected = current - volume;
			if volume > 0.0 && current < volume {
				return Err(VolumeError::insufficient_volume(probe, current, volume).into());
			}
			if volume < 0.0 && expected > f64::from(size) {
				let headroom = (f64::from(size) - current).max(0.0);
				return Err(VolumeError::insufficient_headroom(probe, headroom, -volume).into());
			}
			transfers.push(Transfer {
				probe,
				volume,
				expected,
			});
		}
		if transfers.is_empty() {
			return Ok(());
		}

		for transfer in &transfers {
			if transfer.volume > 0.0 {
				self.set_dispense_volume(transfer.probe, transfer.volume, false)?;
			} else {
				self.set_aspirate_volume(transfer.probe, -transfer.volume, false)?;
			}
		}
		let addresses = self.pumps.read().addresses();
		for address in addresses {
			self.buffered_to(address, "BB")?;
		}
		self.wait_for_buffered()?;

		let started = Instant::now();
		for transfer in &transfers {
			self.await_transfer(transfer, started)?;
		}
		Ok(())
	}

	/// Poll a started transfer until its syringe stops, then check where it
	/// stopped.
	fn await_transfer(&self, transfer: &Transfer, started: Instant) -> Result<(), Error> {
		let mut seen_running = false;
		loop {
			thread::sleep(self.options.poll());
			let (status, volume) = self.pump_status(transfer.probe)?;
			if status == SyringeStatus::Running {
				seen_running = true;
				continue;
			}
			if (volume - transfer.expected).abs() < self.options.tolerance() {
				self.pumps
					.write()
					.update(transfer.probe, |state| state.pending_volume = 0.0);
				return Ok(());
			}
			// A syringe that has not started yet may simply be waiting its turn.
			if seen_running || started.elapsed() > self.options.start_grace() {
				log::warn!(
					"probe {} stopped at {volume} uL, expected {} uL",
					transfer.probe,
					transfer.expected
				);
				return Err(VolumeError::mismatch(transfer.probe, transfer.expected, volume).into());
			}
		}
	}
}

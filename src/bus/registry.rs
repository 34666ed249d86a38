//! The set of devices that have completed a handshake.

use super::BufferReady;
use crate::Probe;
use std::collections::BTreeMap;

/// What a registered device is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DeviceRole {
	/// A Quad-Z liquid handler.
	Controller,
	/// A 402 syringe pump, with the probes its two channels feed.
	Pump {
		/// The probe fed by the left channel.
		left: Probe,
		/// The probe fed by the right channel.
		right: Probe,
	},
}

impl DeviceRole {
	/// How the buffer of a device with this role reports it is ready.
	pub fn buffer_ready(self) -> BufferReady {
		match self {
			DeviceRole::Controller => BufferReady::Handler,
			DeviceRole::Pump { .. } => BufferReady::Pump,
		}
	}
}

/// A registered device.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DeviceEntry {
	address: u8,
	role: DeviceRole,
}

impl DeviceEntry {
	pub(crate) const fn new(address: u8, role: DeviceRole) -> Self {
		DeviceEntry { address, role }
	}

	/// The bus address of the device.
	pub fn address(&self) -> u8 {
		self.address
	}

	/// What the device is.
	pub fn role(&self) -> DeviceRole {
		self.role
	}
}

/// A snapshot of the registered devices, keyed by address.
///
/// Only the bus worker modifies the live registry. Callers get copies from
/// [`Bus::registry`](super::Bus::registry).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
	devices: BTreeMap<u8, DeviceEntry>,
}

impl Registry {
	/// Get the device at `address`, if registered.
	pub fn get(&self, address: u8) -> Option<&DeviceEntry> {
		self.devices.get(&address)
	}

	/// Whether a device is registered at `address`.
	pub fn contains(&self, address: u8) -> bool {
		self.devices.contains_key(&address)
	}

	/// The number of registered devices.
	pub fn len(&self) -> usize {
		self.devices.len()
	}

	/// Whether no device is registered.
	pub fn is_empty(&self) -> bool {
		self.devices.is_empty()
	}

	/// Iterate over the registered devices in address order.
	pub fn iter(&self) -> impl Iterator<Item = &DeviceEntry> + '_ {
		self.devices.values()
	}

	/// Iterate over the registered syringe pumps in address order.
	pub fn pumps(&self) -> impl Iterator<Item = &DeviceEntry> + '_ {
		self.iter()
			.filter(|entry| matches!(entry.role, DeviceRole::Pump { .. }))
	}

	/// Add or replace an entry.
	pub(crate) fn insert(&mut self, entry: DeviceEntry) {
		self.devices.insert(entry.address, entry);
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn pumps_are_filtered_and_ordered() {
		let mut registry = Registry::default();
		assert!(registry.is_empty());
		let pump = DeviceRole::Pump {
			left: Probe::One,
			right: Probe::Two,
		};
		registry.insert(DeviceEntry::new(30, pump));
		registry.insert(DeviceEntry::new(22, DeviceRole::Controller));
		registry.insert(DeviceEntry::new(1, pump));
		assert_eq!(registry.len(), 3);
		assert!(registry.contains(22));
		let pumps: Vec<_> = registry.pumps().map(DeviceEntry::address).collect();
		assert_eq!(pumps, vec![1, 30]);
		assert_eq!(
			registry.get(22).map(DeviceEntry::role),
			Some(DeviceRole::Controller)
		);
		assert_eq!(DeviceRole::Controller.buffer_ready(), BufferReady::Handler);
		assert_eq!(pump.buffer_ready(), BufferReady::Pump);
	}
}

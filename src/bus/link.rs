//! Byte-level GSIOC framing over a [`Backend`].
//!
//! A [`Link`] owns the backend and knows which device (if any) the bus is
//! currently talking to. Every method here performs wire operations and must
//! only ever be called from the bus worker.

use crate::{
	backend::{Backend, UNKNOWN_BACKEND_NAME},
	error::{
		BufferedResponseError, BusError, DeviceNotConnectedError, ResponseSizeError,
		ResponseSizeKind,
	},
};
use std::{io, thread, time::Duration};

/// Releases whichever device is currently connected.
pub(crate) const DISCONNECT: u8 = 0xFF;
/// Requests the next byte of an immediate response.
pub(crate) const ACK: u8 = 0x06;
/// Starts a buffered instruction frame.
pub(crate) const LF: u8 = 0x0A;
/// Ends a buffered instruction frame.
pub(crate) const CR: u8 = 0x0D;
/// The bit marking the final byte of an immediate response.
pub(crate) const END_OF_RESPONSE: u8 = 0x80;
/// The maximum number of reads an immediate response may take.
pub(crate) const MAX_RESPONSE_SIZE: usize = 32;
/// The maximum number of consecutive empty reads within an immediate response.
pub(crate) const MAX_EMPTY_READS: usize = 5;
/// The highest address that can be encoded on the wire. The address byte of
/// 127 would be the disconnect byte.
pub(crate) const MAX_ADDRESS: u8 = 0x7E;

/// The byte that selects the device at `address`.
pub(crate) const fn address_byte(address: u8) -> u8 {
	address + 128
}

/// Delays and retry budget applied to wire operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Timing {
	/// Pause after every wire operation.
	pub settle_delay: Duration,
	/// Pause after transmitting the disconnect byte.
	pub disconnect_delay: Duration,
	/// The number of disconnect+connect sequences attempted before giving up.
	pub max_retries: usize,
}

/// The outcome of a bounded handshake.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Handshake {
	/// The device acknowledged its address. `attempts` is zero if it was
	/// already connected.
	Connected { attempts: usize },
	/// No attempt succeeded.
	RetriesExhausted { attempts: usize },
}

/// The transport plus the bus connection state.
#[derive(Debug)]
pub(crate) struct Link<B> {
	backend: B,
	/// The name used to prefix log messages
	name: String,
	/// The device the bus is currently talking to
	connected: Option<u8>,
	timing: Timing,
}

impl<B: Backend> Link<B> {
	pub fn new(backend: B, timing: Timing) -> Self {
		let name = backend
			.name()
			.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string());
		Link {
			backend,
			name,
			connected: None,
			timing,
		}
	}

	/// The device currently connected, if any.
	#[cfg(test)]
	pub fn connected(&self) -> Option<u8> {
		self.connected
	}

	pub fn settle(&self) {
		pause(self.timing.settle_delay);
	}

	fn write_byte(&mut self, byte: u8) -> io::Result<()> {
		self.backend.write_all(&[byte])?;
		self.backend.flush()
	}

	/// Read a single byte, returning `None` if the read timed out.
	fn read_byte(&mut self) -> io::Result<Option<u8>> {
		let mut buf = [0u8; 1];
		loop {
			return match self.backend.read(&mut buf) {
				Ok(0) => Ok(None),
				Ok(_) => Ok(Some(buf[0])),
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
					Ok(None)
				}
				Err(e) => Err(e),
			};
		}
	}

	/// Release the currently connected device.
	pub fn disconnect(&mut self) -> io::Result<()> {
		log::trace!("{} TX: disconnect", self.name);
		self.connected = None;
		let result = self.write_byte(DISCONNECT);
		pause(self.timing.disconnect_delay);
		result
	}

	/// Select the device at `address` once.
	///
	/// The device must echo its address byte for the attempt to succeed.
	pub fn attempt_connect(&mut self, address: u8) -> Result<(), BusError> {
		let byte = address_byte(address);
		self.write_byte(byte)?;
		let reply = self.read_byte()?;
		log::trace!("{} connect {address}: TX {byte:#04x} RX {reply:02x?}", self.name);
		self.settle();
		if reply == Some(byte) {
			self.connected = Some(address);
			Ok(())
		} else {
			Err(DeviceNotConnectedError::new(address, reply).into())
		}
	}

	/// Make sure the device at `address` is connected, retrying the
	/// disconnect+connect sequence up to the retry budget.
	pub fn establish(&mut self, address: u8) -> io::Result<Handshake> {
		if self.connected == Some(address) {
			return Ok(Handshake::Connected { attempts: 0 });
		}
		for attempt in 1..=self.timing.max_retries {
			self.disconnect()?;
			match self.attempt_connect(address) {
				Ok(()) => {
					log::debug!("{} connected to device {address} (attempt {attempt})", self.name);
					return Ok(Handshake::Connected { attempts: attempt });
				}
				Err(BusError::Io(e)) => return Err(e),
				Err(e) => log::trace!("{} attempt {attempt}: {e}", self.name),
			}
		}
		Ok(Handshake::RetriesExhausted {
			attempts: self.timing.max_retries,
		})
	}

	/// Transmit an immediate command to the connected device and decode its
	/// response.
	pub fn immediate(&mut self, payload: &[u8]) -> Result<String, BusError> {
		let result = self.immediate_exchange(payload);
		if result.is_err() {
			// The device may still be mid-response, so select it again before
			// the next instruction.
			self.connected = None;
		}
		self.settle();
		result
	}

	fn immediate_exchange(&mut self, payload: &[u8]) -> Result<String, BusError> {
		log::debug!("{} TX: {:?}", self.name, String::from_utf8_lossy(payload));
		self.backend.write_all(payload)?;
		self.backend.flush()?;

		let mut response = Vec::new();
		let mut count = 0;
		let mut empty_reads = 0;
		loop {
			if count >= MAX_RESPONSE_SIZE {
				return Err(ResponseSizeError::new(ResponseSizeKind::TooLong, &response).into());
			}
			if empty_reads > MAX_EMPTY_READS {
				return Err(
					ResponseSizeError::new(ResponseSizeKind::TooManyEmptyReads, &response).into(),
				);
			}
			// The device only sends the next byte once the previous one has
			// been acknowledged.
			if count > 0 {
				self.write_byte(ACK)?;
			}
			count += 1;
			match self.read_byte()? {
				Some(byte) if byte & END_OF_RESPONSE != 0 => {
					response.push(byte & !END_OF_RESPONSE);
					break;
				}
				Some(byte) => {
					empty_reads = 0;
					response.push(byte);
				}
				None => empty_reads += 1,
			}
		}
		// Every byte has its high bit clear, so this is plain ASCII.
		let response: String = response.into_iter().map(char::from).collect();
		log::debug!("{} RX: {:?}", self.name, response);
		Ok(response)
	}

	/// Transmit a buffered instruction to the connected device, verifying the
	/// echo of every byte.
	pub fn buffered(&mut self, payload: &[u8]) -> Result<(), BusError> {
		let result = self.buffered_exchange(payload);
		if result.is_err() {
			self.connected = None;
		}
		self.settle();
		result
	}

	fn buffered_exchange(&mut self, payload: &[u8]) -> Result<(), BusError> {
		log::debug!("{} TX: {:?} (buffered)", self.name, String::from_utf8_lossy(payload));
		let frame = std::iter::once(LF)
			.chain(payload.iter().copied())
			.chain(std::iter::once(CR));
		let mut echoed = Vec::with_capacity(payload.len() + 2);
		for byte in frame {
			self.write_byte(byte)?;
			let reply = self.read_byte()?;
			if reply != Some(byte) {
				return Err(BufferedResponseError::new(byte, reply, &echoed).into());
			}
			echoed.push(byte);
		}
		Ok(())
	}
}

fn pause(duration: Duration) {
	if !duration.is_zero() {
		thread::sleep(duration);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::backend::Mock;
	use std::collections::VecDeque;

	const NO_DELAY: Timing = Timing {
		settle_delay: Duration::ZERO,
		disconnect_delay: Duration::ZERO,
		max_retries: 10,
	};

	/// A responder that echoes the address byte of `address` only after
	/// `refusals` attempts have been ignored.
	fn stubborn_device(address: u8, mut refusals: usize) -> Mock {
		Mock::with_responder(move |byte: u8, rx: &mut VecDeque<u8>| {
			if byte == address_byte(address) {
				if refusals == 0 {
					rx.push_back(byte);
				} else {
					refusals -= 1;
				}
			}
		})
	}

	#[test]
	fn handshake_stops_at_first_success() {
		let mock = stubborn_device(3, 2);
		let mut link = Link::new(mock.clone(), NO_DELAY);
		assert_eq!(
			link.establish(3).unwrap(),
			Handshake::Connected { attempts: 3 }
		);
		assert_eq!(link.connected(), Some(3));
		assert_eq!(
			mock.written(),
			vec![DISCONNECT, 0x83, DISCONNECT, 0x83, DISCONNECT, 0x83]
		);

		// Already connected, so nothing is transmitted.
		mock.clear_history();
		assert_eq!(
			link.establish(3).unwrap(),
			Handshake::Connected { attempts: 0 }
		);
		assert!(mock.written().is_empty());
	}

	#[test]
	fn handshake_exhausts_retry_budget() {
		let mock = stubborn_device(3, usize::MAX);
		let mut link = Link::new(mock.clone(), NO_DELAY);
		assert_eq!(
			link.establish(3).unwrap(),
			Handshake::RetriesExhausted { attempts: 10 }
		);
		assert_eq!(link.connected(), None);
		let written = mock.written();
		assert_eq!(written.len(), 20);
		assert_eq!(written.iter().filter(|&&b| b == DISCONNECT).count(), 10);
	}

	#[test]
	fn connect_rejects_wrong_echo() {
		let mock = Mock::new();
		mock.append_data([0x84]);
		let mut link = Link::new(mock, NO_DELAY);
		let err = link.attempt_connect(3).unwrap_err();
		match err {
			BusError::DeviceNotConnected(e) => {
				assert_eq!(e.address(), 3);
				assert_eq!(e.received(), Some(0x84));
			}
			e => panic!("unexpected error {e:?}"),
		}
	}

	#[test]
	fn immediate_terminates_on_high_bit() {
		let mock = Mock::new();
		mock.append_data([b'4', b'0', b'2' | 0x80, b'x']);
		let mut link = Link::new(mock.clone(), NO_DELAY);
		assert_eq!(link.immediate(b"%").unwrap(), "402");
		// One ACK before each byte after the first, and the trailing byte is
		// never read.
		assert_eq!(mock.written(), vec![b'%', ACK, ACK]);
		assert_eq!(mock.reads().len(), 3);
		assert!(!mock.is_empty());
	}

	#[test]
	fn immediate_rejects_long_response() {
		let mock = Mock::new();
		mock.append_data([b'a'; 40]);
		let mut link = Link::new(mock.clone(), NO_DELAY);
		let err = link.immediate(b"R").unwrap_err();
		match err {
			BusError::ResponseSize(e) => {
				assert_eq!(e.kind(), ResponseSizeKind::TooLong);
				assert_eq!(e.received().len(), MAX_RESPONSE_SIZE);
			}
			e => panic!("unexpected error {e:?}"),
		}
		assert_eq!(mock.reads().len(), MAX_RESPONSE_SIZE);
	}

	#[test]
	fn immediate_rejects_dead_bus() {
		let mock = Mock::new();
		mock.append_data([b'1']);
		let mut link = Link::new(mock.clone(), NO_DELAY);
		let err = link.immediate(b"e").unwrap_err();
		match err {
			BusError::ResponseSize(e) => {
				assert_eq!(e.kind(), ResponseSizeKind::TooManyEmptyReads);
				assert_eq!(e.received(), b"1");
			}
			e => panic!("unexpected error {e:?}"),
		}
		let reads = mock.reads();
		assert_eq!(reads.len(), 1 + MAX_EMPTY_READS + 1);
		assert!(reads[1..].iter().all(Option::is_none));
	}

	#[test]
	fn empty_reads_must_be_consecutive() {
		let mock = Mock::with_responder({
			let mut acks = 0;
			move |byte: u8, rx: &mut VecDeque<u8>| {
				if byte == ACK {
					acks += 1;
					// Go quiet for a few reads, then send another byte.
					match acks {
						4 => rx.push_back(b'1'),
						8 => rx.push_back(b'2' | END_OF_RESPONSE),
						_ => {}
					}
				} else {
					rx.push_back(b'0');
				}
			}
		});
		let mut link = Link::new(mock, NO_DELAY);
		assert_eq!(link.immediate(b"e").unwrap(), "012");
	}

	#[test]
	fn buffered_echo_ok() {
		let mock = Mock::with_responder(|byte: u8, rx: &mut VecDeque<u8>| rx.push_back(byte));
		let mut link = Link::new(mock.clone(), NO_DELAY);
		link.buffered(b"SH").unwrap();
		assert_eq!(mock.written(), vec![LF, b'S', b'H', CR]);
	}

	#[test]
	fn buffered_aborts_on_first_mismatch() {
		let mock = Mock::with_responder(|byte: u8, rx: &mut VecDeque<u8>| {
			rx.push_back(if byte == b'Y' { b'y' } else { byte });
		});
		let mut link = Link::new(mock.clone(), NO_DELAY);
		link.connected = Some(22);
		let err = link.buffered(b"SY200").unwrap_err();
		match err {
			BusError::BufferedResponse(e) => {
				assert_eq!(e.expected(), b'Y');
				assert_eq!(e.received(), Some(b'y'));
				assert_eq!(e.echoed(), &[LF, b'S']);
			}
			e => panic!("unexpected error {e:?}"),
		}
		// Nothing after the mismatching byte is transmitted.
		assert_eq!(mock.written(), vec![LF, b'S', b'Y']);
		assert_eq!(link.connected(), None);
	}
}

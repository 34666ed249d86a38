//! Error types produced by the bus engine.

/// Why an immediate response was rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResponseSizeKind {
	/// More bytes were read than any response may contain.
	TooLong,
	/// Too many consecutive reads came back empty.
	TooManyEmptyReads,
}

/// An immediate response violated the framing bounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseSizeError {
	kind: ResponseSizeKind,
	received: Box<[u8]>,
}

impl ResponseSizeError {
	/// Create a new error from the bytes received so far.
	pub(crate) fn new(kind: ResponseSizeKind, received: &[u8]) -> Self {
		ResponseSizeError {
			kind,
			received: Box::from(received),
		}
	}

	/// Which bound was exceeded.
	pub fn kind(&self) -> ResponseSizeKind {
		self.kind
	}

	/// The (unterminated) bytes received before the error.
	pub fn received(&self) -> &[u8] {
		&self.received
	}
}

impl_error_display! {
	ResponseSizeError,
	self => "malformed immediate response ({}) after receiving {:?}",
	match self.kind {
		ResponseSizeKind::TooLong => "response too long",
		ResponseSizeKind::TooManyEmptyReads => "too many empty reads",
	},
	String::from_utf8_lossy(&self.received)
}

/// A byte of a buffered instruction was not echoed back by the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferedResponseError {
	expected: u8,
	received: Option<u8>,
	echoed: Box<[u8]>,
}

impl BufferedResponseError {
	/// Create a new error.
	pub(crate) fn new(expected: u8, received: Option<u8>, echoed: &[u8]) -> Self {
		BufferedResponseError {
			expected,
			received,
			echoed: Box::from(echoed),
		}
	}

	/// The byte that was transmitted.
	pub fn expected(&self) -> u8 {
		self.expected
	}

	/// The byte that was read back, if any.
	pub fn received(&self) -> Option<u8> {
		self.received
	}

	/// The framed bytes that were echoed correctly before the mismatch.
	pub fn echoed(&self) -> &[u8] {
		&self.echoed
	}
}

impl_error_display! {
	BufferedResponseError,
	self => "buffered instruction echo mismatch: sent 0x{:02x}, read back {} (after {} good bytes)",
	self.expected,
	self.received.map_or_else(|| "nothing".to_string(), |b| format!("0x{b:02x}")),
	self.echoed.len()
}

/// An instruction targeted an address that never completed a handshake.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DeviceNotRegisteredError {
	address: u8,
}

impl DeviceNotRegisteredError {
	pub(crate) const fn new(address: u8) -> Self {
		DeviceNotRegisteredError { address }
	}

	/// The unregistered address.
	pub fn address(&self) -> u8 {
		self.address
	}
}

impl_error_display! {
	DeviceNotRegisteredError,
	self => "device {} has not been registered",
	self.address
}

/// A single connection attempt was rejected: the device did not echo its
/// address byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DeviceNotConnectedError {
	address: u8,
	received: Option<u8>,
}

impl DeviceNotConnectedError {
	pub(crate) const fn new(address: u8, received: Option<u8>) -> Self {
		DeviceNotConnectedError { address, received }
	}

	/// The address of the device.
	pub fn address(&self) -> u8 {
		self.address
	}

	/// The byte read instead of the echoed address byte, if any.
	pub fn received(&self) -> Option<u8> {
		self.received
	}
}

impl_error_display! {
	DeviceNotConnectedError,
	self => "device {} did not acknowledge its address",
	self.address
}

/// Every handshake attempt with a device failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DeviceNotRespondingError {
	address: u8,
	attempts: usize,
}

impl DeviceNotRespondingError {
	pub(crate) const fn new(address: u8, attempts: usize) -> Self {
		DeviceNotRespondingError { address, attempts }
	}

	/// The address of the device.
	pub fn address(&self) -> u8 {
		self.address
	}

	/// The number of handshakes attempted.
	pub fn attempts(&self) -> usize {
		self.attempts
	}
}

impl_error_display! {
	DeviceNotRespondingError,
	self => "device {} did not respond after {} connection attempts",
	self.address,
	self.attempts
}

/// The bus worker is no longer running, so no instruction can be executed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct EngineStoppedError;

impl_error_display! {
	EngineStoppedError,
	self => "the bus worker has stopped"
}

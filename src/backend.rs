//! Types that can exchange (read/write) bytes with devices on the bus.
//!
//! The [`Backend`] trait represents all such types.

use std::io;
use std::time::Duration;

use serialport as sp;

#[cfg(windows)]
use sp::COMPort as ExternSerial;
use sp::SerialPort;
#[cfg(unix)]
use sp::TTYPort as ExternSerial;

#[cfg(any(test, feature = "mock"))]
use parking_lot::Mutex;
#[cfg(any(test, feature = "mock"))]
use std::{collections::VecDeque, sync::Arc};

/// The placeholder name for a backend that doesn't have a name.
pub(crate) const UNKNOWN_BACKEND_NAME: &str = "<unknown backend>";

/// Types that allow reading and writing bytes with devices on the bus.
///
/// A backend is moved onto the bus worker thread, so it must be `Send`.
pub trait Backend: io::Read + io::Write + Send + private::Sealed {
	/// Set the read timeout.
	///
	/// If timeout is `None`, reads will block indefinitely.
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error>;

	/// Get the read timeout.
	///
	/// If timeout is `None`, reads will block indefinitely.
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error>;

	/// Get the "name" of the backend.
	///
	/// This can be in any format, but should uniquely identify the backend
	/// instance.
	fn name(&self) -> Option<String>;
}

impl<C: Backend + ?Sized> Backend for Box<C> {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		(**self).set_read_timeout(timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		(**self).read_timeout()
	}
	fn name(&self) -> Option<String> {
		(**self).name()
	}
}

impl Backend for std::net::TcpStream {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		std::net::TcpStream::set_read_timeout(self, timeout)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		std::net::TcpStream::read_timeout(self)
	}
	fn name(&self) -> Option<String> {
		self.peer_addr().map(|addr| format!("{addr}")).ok()
	}
}

/// A platform agnostic serial port backend.
//
// The `serialport` crate exposes two platform specific serial ports, `COMPort`
// and `TTYPort` for windows and unix, respectively. Wrapping whichever one the
// platform uses in a new type keeps the rest of the crate free of cfgs.
#[derive(Debug)]
pub struct Serial(pub(crate) ExternSerial);

impl io::Read for Serial {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.0.read(buf)
	}
}

impl io::Write for Serial {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.write(buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.0.flush()
	}
}

impl Backend for Serial {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		// The serialport API does not support infinite timeouts, so simply set
		// the timeout to the largest possible duration if `timeout` is `None`,
		// which is practically infinite.
		Ok(self.0.set_timeout(timeout.unwrap_or(Duration::MAX))?)
	}
	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		Ok(Some(self.0.timeout()))
	}
	fn name(&self) -> Option<String> {
		self.0.name()
	}
}

/// Something that reacts to bytes written to a [`Mock`] backend.
///
/// Each written byte is passed to [`on_byte`](Responder::on_byte), which may
/// queue bytes for the backend to return from subsequent reads.
#[cfg(any(test, feature = "mock"))]
#[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(feature = "mock")))]
pub trait Responder: Send {
	/// React to `byte` being written, pushing any reply onto `rx`.
	fn on_byte(&mut self, byte: u8, rx: &mut VecDeque<u8>);
}

#[cfg(any(test, feature = "mock"))]
impl<F> Responder for F
where
	F: FnMut(u8, &mut VecDeque<u8>) + Send,
{
	fn on_byte(&mut self, byte: u8, rx: &mut VecDeque<u8>) {
		(self)(byte, rx);
	}
}

/// The state shared by all clones of a [`Mock`].
#[cfg(any(test, feature = "mock"))]
struct MockState {
	/// The data that reads are served from
	rx: VecDeque<u8>,
	/// Every byte written so far
	tx: Vec<u8>,
	/// The reads performed so far, `None` for an empty read
	reads: Vec<Option<u8>>,
	/// Generates replies to written bytes, if any
	responder: Option<Box<dyn Responder>>,
	/// The error to surface on the next read, if any. It is only surfaced once.
	read_error: Option<io::Error>,
	/// The error to surface on the next write, if any. It is only surfaced once.
	write_error: Option<io::Error>,
	/// The read timeout, which is ignored.
	ignored_read_timeout: Option<Duration>,
}

/// A mock backend for use in testing.
///
/// It has the following features:
///   * It records all data written to it.
///   * It can be filled with data for reading, or given a [`Responder`] that
///     generates replies as bytes are written.
///   * Specific errors can be inserted for calls to `read` and `write`.
///
/// Clones share the same state, so a test can keep a clone to inspect the
/// traffic after handing the backend to a bus.
#[cfg(any(test, feature = "mock"))]
#[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(feature = "mock")))]
#[derive(Clone)]
pub struct Mock {
	state: Arc<Mutex<MockState>>,
}

#[cfg(any(test, feature = "mock"))]
impl Mock {
	/// Create a new Mock backend.
	pub fn new() -> Self {
		Mock {
			state: Arc::new(Mutex::new(MockState {
				rx: VecDeque::new(),
				tx: Vec::new(),
				reads: Vec::new(),
				responder: None,
				read_error: None,
				write_error: None,
				ignored_read_timeout: Some(Duration::ZERO),
			})),
		}
	}
	/// Create a new Mock backend whose replies are generated by `responder`.
	pub fn with_responder<R: Responder + 'static>(responder: R) -> Self {
		let mock = Mock::new();
		mock.state.lock().responder = Some(Box::new(responder));
		mock
	}
	/// Append data to the read buffer.
	///
	/// The data is not validated in any way.
	pub fn append_data<T: AsRef<[u8]>>(&self, bytes: T) {
		self.state.lock().rx.extend(bytes.as_ref());
	}
	/// Clear the read buffer.
	pub fn clear_buffer(&self) {
		self.state.lock().rx.clear();
	}
	/// Whether the mock has any data available or not
	pub fn is_empty(&self) -> bool {
		self.state.lock().rx.is_empty()
	}
	/// Every byte written to the backend so far.
	pub fn written(&self) -> Vec<u8> {
		self.state.lock().tx.clone()
	}
	/// Every read performed so far, with `None` marking a read that timed out.
	pub fn reads(&self) -> Vec<Option<u8>> {
		self.state.lock().reads.clone()
	}
	/// Forget all written bytes and performed reads.
	pub fn clear_history(&self) {
		let mut state = self.state.lock();
		state.tx.clear();
		state.reads.clear();
	}
	/// Set the error for the next `read`, if any.
	pub fn read_error(&self, err: Option<io::Error>) {
		self.state.lock().read_error = err;
	}
	/// Set the error for the next `write`, if any.
	pub fn write_error(&self, err: Option<io::Error>) {
		self.state.lock().write_error = err;
	}
}

#[cfg(any(test, feature = "mock"))]
impl Default for Mock {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(any(test, feature = "mock"))]
impl std::fmt::Debug for Mock {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("Mock")
			.field("rx", &state.rx)
			.field("tx", &state.tx.len())
			.field("responder", &state.responder.is_some())
			.finish_non_exhaustive()
	}
}

#[cfg(any(test, feature = "mock"))]
impl Backend for Mock {
	fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
		self.state.lock().ignored_read_timeout = timeout;
		Ok(())
	}

	fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
		Ok(self.state.lock().ignored_read_timeout)
	}

	fn name(&self) -> Option<String> {
		Some(format!("<mock 0x{:x}>", Arc::as_ptr(&self.state) as usize))
	}
}

#[cfg(any(test, feature = "mock"))]
impl io::Read for Mock {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		let mut state = self.state.lock();
		if let Some(err) = state.read_error.take() {
			return Err(err);
		}
		if buf.is_empty() {
			return Ok(0);
		}
		if let Some(byte) = state.rx.pop_front() {
			state.reads.push(Some(byte));
			buf[0] = byte;
			Ok(1)
		} else {
			// For a real device, having no data ready would result in a wait
			// and then eventual timeout error. However, as our data is in
			// memory that does not happen here. So simulate that behaviour by
			// returning a timeout error immediately.
			state.reads.push(None);
			Err(io::Error::new(
				io::ErrorKind::TimedOut,
				"Simulated timeout error",
			))
		}
	}
}

#[cfg(any(test, feature = "mock"))]
impl io::Write for Mock {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		let mut state = self.state.lock();
		if let Some(err) = state.write_error.take() {
			return Err(err);
		}
		let MockState { rx, tx, responder, .. } = &mut *state;
		for &byte in buf {
			tx.push(byte);
			if let Some(responder) = responder {
				responder.on_byte(byte, rx);
			}
		}
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

mod private {
	pub trait Sealed {}

	impl Sealed for super::Serial {}
	impl Sealed for std::net::TcpStream {}
	#[cfg(any(test, feature = "mock"))]
	impl Sealed for super::Mock {}
	impl<C: super::Backend + ?Sized> Sealed for Box<C> {}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::io::{Read as _, Write as _};

	#[test]
	fn mock_replies_through_responder() {
		let mut mock = Mock::with_responder(|byte: u8, rx: &mut VecDeque<u8>| {
			rx.push_back(byte.wrapping_add(1));
		});
		let observer = mock.clone();
		mock.write_all(&[1, 2]).unwrap();

		let mut buf = [0u8; 1];
		assert_eq!(mock.read(&mut buf).unwrap(), 1);
		assert_eq!(buf[0], 2);
		assert_eq!(mock.read(&mut buf).unwrap(), 1);
		assert_eq!(buf[0], 3);
		let err = mock.read(&mut buf).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::TimedOut);

		assert_eq!(observer.written(), vec![1, 2]);
		assert_eq!(observer.reads(), vec![Some(2), Some(3), None]);
	}

	#[test]
	fn mock_errors_surface_once() {
		let mut mock = Mock::new();
		mock.append_data([7]);
		mock.read_error(Some(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
		let mut buf = [0u8; 1];
		assert_eq!(
			mock.read(&mut buf).unwrap_err().kind(),
			io::ErrorKind::BrokenPipe
		);
		assert_eq!(mock.read(&mut buf).unwrap(), 1);
		assert!(mock.is_empty());
	}
}

//! The GSIOC bus protocol engine.
//!
//! A [`Bus`] owns the transport through a single worker thread, so no two
//! instructions ever share the wire. Callers submit either
//!
//!  * immediate instructions, which block until the device's response has been
//!    decoded ([`Bus::submit_immediate`]), or
//!  * buffered instructions, which are queued in one global FIFO and
//!    transmitted in the background ([`Bus::submit_buffered`]).
//!
//! Call [`Bus::drain_buffered`] before issuing a read that depends on earlier
//! buffered instructions having been transmitted.
//!
//! ```rust
//! # use gsioc::bus::{BufferReady, BusOptions, DeviceRole};
//! # fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = BusOptions::new().open_serial("/dev/ttyUSB0")?;
//! assert!(bus.register_device(22, DeviceRole::Controller));
//! let version = bus.submit_immediate(22, "%")?;
//! bus.submit_buffered(22, "SH", BufferReady::Handler)?;
//! bus.drain_buffered();
//! assert!(bus.take_buffered_failures().is_empty());
//! # Ok(())
//! # }
//! ```

pub(crate) mod link;
mod options;
mod registry;
mod worker;


pub use options::BusOptions;
pub use registry::{DeviceEntry, DeviceRole, Registry};

use crate::{
	backend::{Backend, UNKNOWN_BACKEND_NAME},
	error::{BusError, EngineStoppedError},
};
use crossbeam_channel::Sender;
use link::{Link, Timing};
use parking_lot::{Condvar, Mutex, RwLock};
use std::{fmt, io, sync::Arc, thread::JoinHandle};
use worker::{BufferedInstruction, Request, Worker};

/// How the worker decides that a device can accept a buffered instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferReady {
	/// Wait until the device's buffer status is the literal `|` (Quad-Z).
	Handler,
	/// Wait until the device's buffer status starts with `0` (402 pumps).
	Pump,
	/// Transmit without checking.
	Unchecked,
}

impl BufferReady {
	/// Whether the buffer `status` reply satisfies this predicate.
	pub fn is_ready(self, status: &str) -> bool {
		match self {
			BufferReady::Handler => status == "|",
			BufferReady::Pump => status.starts_with('0'),
			BufferReady::Unchecked => true,
		}
	}
}

/// The position of a buffered instruction in the global FIFO.
///
/// Identifiers increase in submission order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstructionId(u64);

impl InstructionId {
	/// The raw sequence number.
	pub fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for InstructionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// A buffered instruction that could not be transmitted.
#[derive(Debug)]
pub struct BufferedFailure {
	id: InstructionId,
	address: u8,
	payload: String,
	error: BusError,
}

impl BufferedFailure {
	/// The instruction that failed.
	pub fn id(&self) -> InstructionId {
		self.id
	}
	/// The address it targeted.
	pub fn address(&self) -> u8 {
		self.address
	}
	/// The payload, without framing.
	pub fn payload(&self) -> &str {
		&self.payload
	}
	/// Why it failed.
	pub fn error(&self) -> &BusError {
		&self.error
	}
	/// Take the error.
	pub fn into_error(self) -> BusError {
		self.error
	}
}

struct QueueCounters {
	next_id: u64,
	/// Submitted but not yet executed
	pending: usize,
	/// Set once the worker has exited
	stopped: bool,
	failures: Vec<BufferedFailure>,
}

/// Bookkeeping for the buffered queue, shared between the handle and the
/// worker. This is also the drain signal.
pub(crate) struct QueueState {
	counters: Mutex<QueueCounters>,
	idle: Condvar,
}

impl QueueState {
	fn new() -> Self {
		QueueState {
			counters: Mutex::new(QueueCounters {
				next_id: 0,
				pending: 0,
				stopped: false,
				failures: Vec::new(),
			}),
			idle: Condvar::new(),
		}
	}

	/// Assign the next id and hand it to `send`, all under the lock so that
	/// channel order always matches id order.
	fn enqueue<F>(&self, send: F) -> Option<InstructionId>
	where
		F: FnOnce(InstructionId) -> bool,
	{
		let mut counters = self.counters.lock();
		if counters.stopped {
			return None;
		}
		let id = InstructionId(counters.next_id);
		if !send(id) {
			return None;
		}
		counters.next_id += 1;
		counters.pending += 1;
		Some(id)
	}

	/// Record the outcome of an executed instruction.
	pub(crate) fn complete(&self, failure: Option<BufferedFailure>) {
		let mut counters = self.counters.lock();
		counters.pending = counters.pending.saturating_sub(1);
		counters.failures.extend(failure);
		if counters.pending == 0 {
			self.idle.notify_all();
		}
	}

	pub(crate) fn shutdown(&self) {
		let mut counters = self.counters.lock();
		counters.stopped = true;
		self.idle.notify_all();
	}

	fn wait_idle(&self) {
		let mut counters = self.counters.lock();
		while counters.pending > 0 && !counters.stopped {
			self.idle.wait(&mut counters);
		}
	}

	fn pending(&self) -> usize {
		self.counters.lock().pending
	}

	fn take_failures(&self) -> Vec<BufferedFailure> {
		std::mem::take(&mut self.counters.lock().failures)
	}
}

/// A handle to a running GSIOC bus.
///
/// The handle can be shared between threads. Dropping it transmits any
/// buffered instructions still queued and then stops the worker.
pub struct Bus {
	immediate: Option<Sender<Request>>,
	buffered: Option<Sender<BufferedInstruction>>,
	queue: Arc<QueueState>,
	registry: Arc<RwLock<Registry>>,
	worker: Option<JoinHandle<()>>,
	name: String,
	max_retries: usize,
}

impl Bus {
	/// Open the serial port at `path` with the default [`BusOptions`].
	pub fn open_serial(path: &str) -> Result<Bus, crate::Error> {
		BusOptions::new().open_serial(path)
	}

	/// Start a worker thread that owns `backend`.
	fn spawn<B: Backend + 'static>(backend: B, timing: Timing) -> io::Result<Bus> {
		let name = backend
			.name()
			.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string());
		let (immediate_tx, immediate_rx) = crossbeam_channel::unbounded();
		let (buffered_tx, buffered_rx) = crossbeam_channel::unbounded();
		let queue = Arc::new(QueueState::new());
		let registry = Arc::new(RwLock::new(Registry::default()));
		let worker = Worker::new(
			Link::new(backend, timing),
			name.clone(),
			immediate_rx,
			buffered_rx,
			Arc::clone(&registry),
			Arc::clone(&queue),
		);
		let handle = std::thread::Builder::new()
			.name("gsioc-bus".to_string())
			.spawn(move || worker.run())?;
		Ok(Bus {
			immediate: Some(immediate_tx),
			buffered: Some(buffered_tx),
			queue,
			registry,
			worker: Some(handle),
			name,
			max_retries: timing.max_retries,
		})
	}

	/// The name of the underlying backend.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// The number of handshake attempts made before a device is reported as
	/// not responding.
	pub fn max_retries(&self) -> usize {
		self.max_retries
	}

	fn send_request(&self, request: Request) -> Result<(), BusError> {
		self.immediate
			.as_ref()
			.ok_or(EngineStoppedError)?
			.send(request)
			.map_err(|_| EngineStoppedError.into())
	}

	/// Handshake with the device at `address` and, if it answers within the
	/// retry budget, add it to the registry with the given `role`.
	///
	/// Registering an address again replaces its role. Returns `false` if the
	/// device did not answer, the address cannot be encoded, or the worker has
	/// stopped.
	pub fn register_device(&self, address: u8, role: DeviceRole) -> bool {
		let (reply, response) = crossbeam_channel::bounded(1);
		if self
			.send_request(Request::Register {
				address,
				role,
				reply,
			})
			.is_err()
		{
			return false;
		}
		response.recv().unwrap_or(false)
	}

	/// Execute an immediate instruction, blocking until the response has been
	/// decoded.
	///
	/// The device must have been registered. Pending buffered instructions are
	/// not waited for.
	pub fn submit_immediate<P: AsRef<[u8]>>(
		&self,
		address: u8,
		payload: P,
	) -> Result<String, BusError> {
		let (reply, response) = crossbeam_channel::bounded(1);
		self.send_request(Request::Immediate {
			address,
			payload: payload.as_ref().to_vec(),
			reply,
		})?;
		response
			.recv()
			.unwrap_or_else(|_| Err(EngineStoppedError.into()))
	}

	/// Queue a buffered instruction and return immediately.
	///
	/// Before transmitting, the worker waits until the device reports its
	/// buffer as `ready`. Transmission failures are recorded against the
	/// returned id and can be collected with
	/// [`take_buffered_failures`](Bus::take_buffered_failures).
	pub fn submit_buffered<P: AsRef<[u8]>>(
		&self,
		address: u8,
		payload: P,
		ready: BufferReady,
	) -> Result<InstructionId, BusError> {
		let sender = self.buffered.as_ref().ok_or(EngineStoppedError)?;
		let payload = payload.as_ref().to_vec();
		self.queue
			.enqueue(|id| {
				sender
					.send(BufferedInstruction {
						id,
						address,
						payload,
						ready,
					})
					.is_ok()
			})
			.ok_or_else(|| EngineStoppedError.into())
	}

	/// Block until every buffered instruction submitted so far has been
	/// executed (or the worker has stopped).
	pub fn drain_buffered(&self) {
		self.queue.wait_idle();
	}

	/// The number of buffered instructions not yet executed.
	pub fn pending_buffered(&self) -> usize {
		self.queue.pending()
	}

	/// Take the failures recorded for buffered instructions since the last
	/// call, in execution order.
	pub fn take_buffered_failures(&self) -> Vec<BufferedFailure> {
		self.queue.take_failures()
	}

	/// A snapshot of the registered devices.
	pub fn registry(&self) -> Registry {
		self.registry.read().clone()
	}

	/// The registered device at `address`, if any.
	pub fn device(&self, address: u8) -> Option<DeviceEntry> {
		self.registry.read().get(address).copied()
	}
}

impl fmt::Debug for Bus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Bus")
			.field("name", &self.name)
			.field("pending_buffered", &self.pending_buffered())
			.finish_non_exhaustive()
	}
}

impl Drop for Bus {
	fn drop(&mut self) {
		// Closing the immediate channel first puts the worker in its draining
		// state, then closing the buffered channel lets it exit.
		self.immediate.take();
		self.buffered.take();
		if let Some(handle) = self.worker.take() {
			if handle.join().is_err() {
				log::error!("{} worker panicked", self.name);
			}
		}
	}
}

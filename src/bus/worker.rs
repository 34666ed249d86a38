//! The thread that owns the transport.
//!
//! Immediate requests (and registrations) arrive on a priority channel and
//! buffered instructions on a FIFO channel. Before each buffered instruction
//! the worker services every pending immediate request, so a caller blocked on
//! an immediate answer waits for at most one buffered frame.

use super::{
	link::{Handshake, Link, MAX_ADDRESS},
	registry::{DeviceEntry, DeviceRole, Registry},
	BufferReady, BufferedFailure, InstructionId, QueueState,
};
use crate::{
	backend::Backend,
	error::{BusError, DeviceNotRegisteredError, DeviceNotRespondingError},
};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::RwLock;
use std::sync::Arc;

/// The immediate command that reports the state of a device's buffer.
pub(crate) const BUFFER_STATUS: &[u8] = b"S";

/// A request that preempts buffered instructions.
pub(crate) enum Request {
	/// Handshake with a device and, if it answers, add it to the registry.
	Register {
		address: u8,
		role: DeviceRole,
		reply: Sender<bool>,
	},
	/// Execute an immediate instruction.
	Immediate {
		address: u8,
		payload: Vec<u8>,
		reply: Sender<Result<String, BusError>>,
	},
}

/// A queued buffered instruction.
pub(crate) struct BufferedInstruction {
	pub id: InstructionId,
	pub address: u8,
	pub payload: Vec<u8>,
	pub ready: BufferReady,
}

/// What the worker is doing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum WorkerState {
	/// Serving both channels.
	Running,
	/// The bus handle is gone. Transmit what remains of the buffered queue.
	Draining,
	/// Nothing left to do.
	Stopped,
}

enum Job {
	Request(Request),
	Buffered(BufferedInstruction),
}

/// The result of waiting on both channels at once.
enum Selected {
	Immediate(Option<Request>),
	Buffered(Option<BufferedInstruction>),
}

pub(crate) struct Worker<B> {
	link: Link<B>,
	immediate: Receiver<Request>,
	buffered: Receiver<BufferedInstruction>,
	registry: Arc<RwLock<Registry>>,
	queue: Arc<QueueState>,
	state: WorkerState,
	name: String,
}

impl<B: Backend> Worker<B> {
	pub fn new(
		link: Link<B>,
		name: String,
		immediate: Receiver<Request>,
		buffered: Receiver<BufferedInstruction>,
		registry: Arc<RwLock<Registry>>,
		queue: Arc<QueueState>,
	) -> Self {
		Worker {
			link,
			immediate,
			buffered,
			registry,
			queue,
			state: WorkerState::Running,
			name,
		}
	}

	/// Serve requests until both channels are closed.
	pub fn run(mut self) {
		log::debug!("{} worker started", self.name);
		while let Some(job) = self.next_job() {
			match job {
				Job::Request(request) => self.execute_request(request),
				Job::Buffered(instruction) => self.execute_buffered(instruction),
			}
		}
		if let Err(e) = self.link.disconnect() {
			log::warn!("{} failed to release the bus: {e}", self.name);
		}
		log::debug!("{} worker stopped", self.name);
	}

	/// Wait for the next job, immediate requests first.
	fn next_job(&mut self) -> Option<Job> {
		loop {
			match self.state {
				WorkerState::Running => {
					match self.immediate.try_recv() {
						Ok(request) => return Some(Job::Request(request)),
						Err(TryRecvError::Disconnected) => {
							log::trace!("{} immediate channel closed, draining", self.name);
							self.state = WorkerState::Draining;
							continue;
						}
						Err(TryRecvError::Empty) => {}
					}
					if let Ok(instruction) = self.buffered.try_recv() {
						return Some(Job::Buffered(instruction));
					}
					let selected = crossbeam_channel::select! {
						recv(self.immediate) -> msg => Selected::Immediate(msg.ok()),
						recv(self.buffered) -> msg => Selected::Buffered(msg.ok()),
					};
					match selected {
						Selected::Immediate(Some(request)) => return Some(Job::Request(request)),
						Selected::Immediate(None) => self.state = WorkerState::Draining,
						Selected::Buffered(Some(instruction)) => {
							return Some(Job::Buffered(instruction))
						}
						// Only immediate requests can still arrive.
						Selected::Buffered(None) => {
							if let Ok(request) = self.immediate.recv() {
								return Some(Job::Request(request));
							}
							self.state = WorkerState::Stopped;
						}
					}
				}
				WorkerState::Draining => {
					if let Ok(instruction) = self.buffered.recv() {
						return Some(Job::Buffered(instruction));
					}
					self.state = WorkerState::Stopped;
				}
				WorkerState::Stopped => return None,
			}
		}
	}

	fn execute_request(&mut self, request: Request) {
		match request {
			Request::Register {
				address,
				role,
				reply,
			} => {
				let registered = self.register(address, role);
				// The caller may have given up waiting, which is fine.
				let _ = reply.send(registered);
			}
			Request::Immediate {
				address,
				payload,
				reply,
			} => {
				let result = self.immediate(address, &payload);
				if let Err(e) = &result {
					log::debug!("{} immediate to {address} failed: {e}", self.name);
				}
				let _ = reply.send(result);
			}
		}
	}

	/// Service every pending immediate request without blocking.
	fn service_pending(&mut self) {
		if self.state != WorkerState::Running {
			return;
		}
		while let Ok(request) = self.immediate.try_recv() {
			self.execute_request(request);
		}
	}

	fn register(&mut self, address: u8, role: DeviceRole) -> bool {
		if address > MAX_ADDRESS {
			log::warn!("{} cannot register device {address}: address out of range", self.name);
			return false;
		}
		match self.connect(address) {
			Ok(()) => {
				self.registry
					.write()
					.insert(DeviceEntry::new(address, role));
				log::info!("{} registered device {address} as {role:?}", self.name);
				true
			}
			Err(e) => {
				log::warn!("{} failed to register device {address}: {e}", self.name);
				false
			}
		}
	}

	fn ensure_registered(&self, address: u8) -> Result<(), BusError> {
		if self.registry.read().contains(address) {
			Ok(())
		} else {
			Err(DeviceNotRegisteredError::new(address).into())
		}
	}

	fn connect(&mut self, address: u8) -> Result<(), BusError> {
		match self.link.establish(address)? {
			Handshake::Connected { .. } => Ok(()),
			Handshake::RetriesExhausted { attempts } => {
				Err(DeviceNotRespondingError::new(address, attempts).into())
			}
		}
	}

	fn immediate(&mut self, address: u8, payload: &[u8]) -> Result<String, BusError> {
		self.ensure_registered(address)?;
		self.connect(address)?;
		self.link.immediate(payload)
	}

	fn execute_buffered(&mut self, instruction: BufferedInstruction) {
		let BufferedInstruction {
			id,
			address,
			payload,
			ready,
		} = instruction;
		let failure = match self.buffered(address, &payload, ready) {
			Ok(()) => None,
			Err(error) => {
				log::warn!(
					"{} buffered instruction {id} ({:?}) to {address} failed: {error}",
					self.name,
					String::from_utf8_lossy(&payload)
				);
				Some(BufferedFailure {
					id,
					address,
					payload: String::from_utf8_lossy(&payload).into_owned(),
					error,
				})
			}
		};
		self.queue.complete(failure);
	}

	fn buffered(&mut self, address: u8, payload: &[u8], ready: BufferReady) -> Result<(), BusError> {
		self.ensure_registered(address)?;
		self.wait_buffer_ready(address, ready)?;
		self.connect(address)?;
		self.link.buffered(payload)
	}

	/// Poll the device's buffer status until it can accept an instruction.
	fn wait_buffer_ready(&mut self, address: u8, ready: BufferReady) -> Result<(), BusError> {
		if ready == BufferReady::Unchecked {
			return Ok(());
		}
		loop {
			self.connect(address)?;
			let status = self.link.immediate(BUFFER_STATUS)?;
			if ready.is_ready(&status) {
				return Ok(());
			}
			log::trace!("{} device {address} buffer busy ({status:?})", self.name);
			self.service_pending();
		}
	}
}

impl<B> Drop for Worker<B> {
	fn drop(&mut self) {
		// Wake anyone draining the queue, even if the worker panicked.
		self.queue.shutdown();
	}
}

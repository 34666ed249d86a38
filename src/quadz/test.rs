use super::*;
use crate::{
	bus::BusOptions,
	error::*,
	sim::{Motion, SimBus, SimController, SimPump, Transcript},
	syringe::{Side, SyringeStatus, Valve},
};
use parking_lot::Mutex;
use static_assertions::assert_impl_all;
use std::{sync::Arc, time::Duration};

assert_impl_all!(QuadZ: Send, Sync);

const CONTROLLER: u8 = 22;
const PUMP: u8 = 0;

struct Rig {
	quadz: QuadZ,
	controller: Arc<Mutex<SimController>>,
	pump: Arc<Mutex<SimPump>>,
	transcript: Transcript,
}

fn fast_options() -> ControlOptions {
	let mut options = ControlOptions::new();
	options
		.poll_interval(Duration::from_millis(1))
		.probe_poll_interval(Duration::from_millis(1))
		.settle_delay(Duration::from_millis(5))
		.pump_start_grace(Duration::from_millis(100));
	options
}

/// A liquid handler at 22 with one pump at 0 feeding probes 1 (left) and 2
/// (right).
fn rig(controller: SimController, pump: SimPump) -> Rig {
	let controller = Arc::new(Mutex::new(controller));
	let pump = Arc::new(Mutex::new(pump));
	let sim = SimBus::new()
		.with_device(CONTROLLER, Arc::clone(&controller))
		.with_device(PUMP, Arc::clone(&pump));
	let transcript = sim.transcript();
	let bus = BusOptions::new()
		.settle_delay(Duration::ZERO)
		.disconnect_delay(Duration::ZERO)
		.open_backend(sim.into_mock())
		.unwrap();
	let quadz = QuadZ::from_bus(bus, fast_options());
	quadz.initialize().unwrap();
	quadz.add_pump(PUMP, Probe::One, Probe::Two).unwrap();
	transcript.clear();
	Rig {
		quadz,
		controller,
		pump,
		transcript,
	}
}

fn default_rig() -> Rig {
	rig(SimController::new(), SimPump::new())
}

fn volume_kind(err: Error) -> (Probe, VolumeErrorKind) {
	let err = VolumeError::try_from(err).unwrap();
	(err.probe(), err.kind())
}

#[test]
fn queries_refresh_kinematics() {
	let Rig { quadz, .. } = default_rig();
	assert_eq!(quadz.version().unwrap(), "Quad-Z 215 v1.30");
	assert_eq!(quadz.probe_width().unwrap(), 90);
	assert_eq!(quadz.last_error().unwrap(), 0);
	assert_eq!(quadz.encoder_position().unwrap(), ArmPosition { x: 0, y: 0 });
	assert_eq!(quadz.kinematics(Probe::Two), ProbeKinematics::default());

	assert_eq!(quadz.liquid_sensitivity().unwrap(), [10; 4]);
	assert_eq!(quadz.probe_speed().unwrap(), [100; 4]);
	assert_eq!(quadz.probe_x_positions().unwrap(), [0, 90, 180, 270]);
	let kinematics = quadz.kinematics(Probe::Two);
	assert_eq!(kinematics.x, Some(90));
	assert_eq!(kinematics.speed, Some(100));
	assert_eq!(kinematics.liquid_sensitivity, Some(10));
	assert_eq!(kinematics.z, None);

	let motors = quadz.motor_status().unwrap();
	assert_eq!(motors.x, 'P');
	assert_eq!(motors.z, ['P'; 4]);
	assert_eq!(motors.pump, 'U');
}

#[test]
fn setters_are_buffered() {
	let Rig {
		quadz,
		controller,
		transcript,
		..
	} = default_rig();
	quadz.set_lcd_text("READY").unwrap();
	quadz.set_liquid_sensitivity(Probe::Three, 4).unwrap();
	quadz.set_probe_width(95).unwrap();
	quadz.beep(440, 5).unwrap();
	quadz.wait_for_buffered().unwrap();
	assert_eq!(controller.lock().lcd(), "READY");
	assert_eq!(quadz.lcd_text().unwrap(), "READY");
	assert_eq!(quadz.liquid_sensitivity().unwrap(), [10, 10, 4, 10]);
	assert_eq!(quadz.probe_width().unwrap(), 95);
	let sent: Vec<_> = transcript
		.buffered()
		.into_iter()
		.map(|(_, instruction)| instruction)
		.collect();
	assert_eq!(sent, vec!["SWREADY", "SKc4", "Sw95", "SB440,5"]);
}

#[test]
fn malformed_replies_are_unexpected() {
	let Rig { quadz, .. } = default_rig();
	assert_eq!(quadz.parse_ints::<2>("P", "12/34", '/').unwrap(), [12, 34]);
	for reply in ["12", "12/x", "1/2/3", ""] {
		let err = quadz.parse_ints::<2>("P", reply, '/').unwrap_err();
		let err = UnexpectedResponseError::try_from(err).unwrap();
		assert_eq!(err.response(), reply);
		assert_eq!(err.address(), CONTROLLER);
	}
}

#[test]
fn move_to_queues_one_instruction_then_polls() {
	let Rig {
		quadz, transcript, ..
	} = default_rig();
	quadz
		.move_to(100, 2000, Probe::One, Duration::from_secs(1))
		.unwrap();
	assert_eq!(
		transcript.buffered(),
		vec![(CONTROLLER, "SXa100/2000".to_string())]
	);
	// The buffer status poll, then one sample of the arm.
	assert_eq!(transcript.immediates(CONTROLLER), vec!['S', 'X', 'Y']);
	assert_eq!(quadz.kinematics(Probe::One).x, Some(100));
}

#[test]
fn move_to_waits_for_a_moving_arm() {
	let Rig {
		quadz, controller, ..
	} = rig(
		SimController::new().with_motion(Motion::Stepped(500)),
		SimPump::new(),
	);
	// Past the timeout, but still moving.
	quadz
		.move_to(100, 2000, Probe::One, Duration::ZERO)
		.unwrap();
	let controller = controller.lock();
	assert_eq!(controller.probe_x()[0], 100);
	assert_eq!(controller.y(), 2000);
}

#[test]
fn move_to_reports_a_stalled_arm() {
	let Rig { quadz, .. } = rig(
		SimController::new().with_motion(Motion::Stalled),
		SimPump::new(),
	);
	let err = quadz
		.move_to(100, 2000, Probe::Two, Duration::ZERO)
		.unwrap_err();
	let err = MoveInaccuracyError::try_from(err).unwrap();
	match err.detail() {
		MoveInaccuracy::Arm {
			requested, actual, ..
		} => {
			assert_eq!(*requested, ArmPosition { x: 100, y: 2000 });
			assert_eq!(*actual, ArmPosition { x: 90, y: 0 });
		}
		other => panic!("unexpected detail {other:?}"),
	}
}

#[test]
fn move_to_keeps_polling_while_the_arm_progresses() {
	let Rig { quadz, .. } = rig(
		SimController::new().with_motion(Motion::Stepped(25)),
		SimPump::new(),
	);
	let mut options = fast_options();
	options.settle_delay(Duration::from_millis(60));
	let quadz = QuadZ {
		options,
		..quadz
	};
	// 80 samples to cover; settling before each of them would take seconds.
	let started = std::time::Instant::now();
	quadz
		.move_to(100, 2000, Probe::One, Duration::from_millis(30))
		.unwrap();
	assert!(started.elapsed() < Duration::from_millis(1500));
}

#[test]
fn move_probe_adds_the_tip_offset() {
	let Rig {
		quadz,
		controller,
		transcript,
		..
	} = default_rig();
	quadz
		.move_probe(50, &[Probe::One, Probe::Two], false, Duration::from_secs(1))
		.unwrap();
	assert_eq!(controller.lock().z(), [350, 350, 0, 0]);
	let sent: Vec<_> = transcript
		.buffered()
		.into_iter()
		.map(|(_, instruction)| instruction)
		.collect();
	assert_eq!(sent, vec!["SZa350", "SZb350", "SM"]);
	assert_eq!(quadz.kinematics(Probe::Two).z, Some(350));

	// Nothing to move.
	transcript.clear();
	quadz
		.move_probe(0, &[], false, Duration::from_secs(1))
		.unwrap();
	assert!(transcript.events().is_empty());
}

#[test]
fn move_probe_reports_stalled_probes() {
	let Rig { quadz, .. } = rig(
		SimController::new().with_stalled_probe(Probe::Three),
		SimPump::new(),
	);
	let err = quadz
		.move_probe(0, &[Probe::Three, Probe::Four], false, Duration::ZERO)
		.unwrap_err();
	let err = MoveInaccuracyError::try_from(err).unwrap();
	assert_eq!(
		*err.detail(),
		MoveInaccuracy::Probes {
			requested: 300,
			stalled: vec![(Probe::Three, 0)],
		}
	);
}

#[test]
fn move_probe_stops_at_liquid_when_sensing() {
	let Rig {
		quadz,
		controller,
		transcript,
		..
	} = rig(
		SimController::new().with_stalled_probe(Probe::Three),
		SimPump::new(),
	);
	quadz
		.move_probe(0, &[Probe::Three, Probe::Four], true, Duration::ZERO)
		.unwrap();
	assert_eq!(controller.lock().z(), [0, 0, 0, 300]);
	let sent: Vec<_> = transcript
		.buffered()
		.into_iter()
		.map(|(_, instruction)| instruction)
		.collect();
	assert_eq!(sent, vec!["Szc300", "Szd300", "Sm"]);
}

#[test]
fn add_pump_checks_the_device() {
	let Rig { quadz, .. } = default_rig();
	let err = quadz
		.add_pump(PUMP, Probe::Three, Probe::Three)
		.unwrap_err();
	assert!(matches!(err, Error::Io(_)), "{err:?}");

	let err = quadz
		.add_pump(9, Probe::Three, Probe::Four)
		.unwrap_err();
	let err = DeviceNotRespondingError::try_from(err).unwrap();
	assert_eq!(err.address(), 9);
	assert!(quadz.channel_state(Probe::Three).is_none());

	let sim = SimBus::new().with_device(5, SimPump::new().with_version("305v2.00"));
	let bus = BusOptions::new()
		.settle_delay(Duration::ZERO)
		.disconnect_delay(Duration::ZERO)
		.open_backend(sim.into_mock())
		.unwrap();
	let quadz = QuadZ::from_bus(bus, fast_options());
	let err = quadz
		.add_pump(5, Probe::One, Probe::Two)
		.unwrap_err();
	let err = UnexpectedResponseError::try_from(err).unwrap();
	assert_eq!(err.command(), "%");
	assert_eq!(err.response(), "305v2.00");
	assert!(quadz.channel_state(Probe::One).is_none());
}

#[test]
fn reassigned_probes_drop_their_old_partner() {
	let Rig { quadz, pump, .. } = rig(
		SimController::new(),
		SimPump::new()
			.with_volume(Side::Left, 120.0)
			.with_volume(Side::Right, 7.5),
	);
	quadz.add_pump(PUMP, Probe::Two, Probe::Three).unwrap();
	assert!(quadz.channel_state(Probe::One).is_none());
	assert!(matches!(
		quadz.pump_status(Probe::One).unwrap_err(),
		Error::ProbeNotAssigned(_)
	));

	assert_eq!(
		quadz.pump_status(Probe::Three).unwrap(),
		(SyringeStatus::Ready, 7.5)
	);
	let two = quadz.channel_state(Probe::Two).unwrap();
	assert_eq!((two.side, two.partner), (Side::Left, Probe::Three));
	assert_eq!(two.current_volume, 120.0);
	assert_eq!(pump.lock().volume(Side::Left), 120.0);
}

#[test]
fn pump_rejects_invalid_volumes() {
	let Rig {
		quadz, transcript, ..
	} = default_rig();
	let cases: [&[f64]; 3] = [&[f64::NAN], &[0.0, f64::INFINITY], &[1.0; 5]];
	for volumes in cases {
		let err = quadz.pump(volumes).unwrap_err();
		match err {
			Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidInput),
			other => panic!("unexpected error {other:?}"),
		}
	}
	assert!(transcript.events().is_empty());
}

#[test]
fn unassigned_probe_is_rejected() {
	let Rig {
		quadz, transcript, ..
	} = default_rig();
	let err = quadz.pump_status(Probe::Three).unwrap_err();
	assert_eq!(
		ProbeNotAssignedError::try_from(err).unwrap().probe(),
		Probe::Three
	);
	let err = quadz.pump(&[0.0, 0.0, 10.0]).unwrap_err();
	assert!(matches!(err, Error::ProbeNotAssigned(_)), "{err:?}");
	assert!(transcript.buffered().is_empty());
}

#[test]
fn pump_status_updates_both_sides() {
	let Rig { quadz, .. } = rig(
		SimController::new(),
		SimPump::new()
			.with_volume(Side::Left, 120.0)
			.with_volume(Side::Right, 7.5),
	);
	assert_eq!(
		quadz.pump_status(Probe::Two).unwrap(),
		(SyringeStatus::Ready, 7.5)
	);
	let left = quadz.channel_state(Probe::One).unwrap();
	assert_eq!(left.current_volume, 120.0);
	assert_eq!(left.status, SyringeStatus::Ready);
	assert_eq!(left.side, Side::Left);
	assert_eq!(left.partner, Probe::Two);
	let status = quadz.global_status(Probe::One).unwrap();
	assert_eq!((status.buffer, status.error), (0, 0));
}

#[test]
fn dispense_and_refuse_overdraw() {
	let Rig {
		quadz,
		pump,
		transcript,
		..
	} = rig(
		SimController::new(),
		SimPump::new().with_volume(Side::Left, 200.0),
	);
	quadz.pump(&[150.0]).unwrap();
	assert_eq!(pump.lock().volume(Side::Left), 50.0);
	let state = quadz.channel_state(Probe::One).unwrap();
	assert_eq!(state.current_volume, 50.0);
	assert_eq!(state.pending_volume, 0.0);
	let sent: Vec<_> = transcript
		.buffered()
		.into_iter()
		.map(|(_, instruction)| instruction)
		.collect();
	assert_eq!(sent, vec!["DL150.0", "BB"]);

	transcript.clear();
	let (probe, kind) = volume_kind(quadz.pump(&[250.0]).unwrap_err());
	assert_eq!(probe, Probe::One);
	assert_eq!(
		kind,
		VolumeErrorKind::InsufficientVolume {
			available: 50.0,
			requested: 250.0
		}
	);
	assert!(transcript.buffered().is_empty());
	assert_eq!(pump.lock().volume(Side::Left), 50.0);
}

#[test]
fn aspirate_within_syringe_size() {
	let Rig { quadz, pump, .. } = default_rig();
	quadz.set_syringe_size(Probe::Two, 250, false).unwrap();
	quadz.wait_for_buffered().unwrap();
	assert_eq!(pump.lock().syringe_size(Side::Right), 250);
	assert_eq!(quadz.channel_state(Probe::Two).unwrap().syringe_size, 250);

	let (probe, kind) = volume_kind(quadz.pump(&[0.0, -300.0]).unwrap_err());
	assert_eq!(probe, Probe::Two);
	assert_eq!(
		kind,
		VolumeErrorKind::InsufficientHeadroom {
			headroom: 250.0,
			requested: 300.0
		}
	);

	quadz.pump(&[0.0, -100.0]).unwrap();
	assert_eq!(pump.lock().volume(Side::Right), 100.0);
	assert_eq!(quadz.channel_state(Probe::Two).unwrap().headroom(), 150.0);
	// A syringe of unknown size has no room at all.
	assert!(quadz.pump(&[-10.0]).is_err());
}

#[test]
fn stalled_syringe_is_a_mismatch() {
	let Rig { quadz, .. } = rig(
		SimController::new(),
		SimPump::new()
			.with_volume(Side::Left, 200.0)
			.with_stalled(Side::Left),
	);
	let (probe, kind) = volume_kind(quadz.pump(&[100.0]).unwrap_err());
	assert_eq!(probe, Probe::One);
	assert_eq!(
		kind,
		VolumeErrorKind::Mismatch {
			expected: 100.0,
			actual: 150.0
		}
	);
}

#[test]
fn blocking_volume_and_start() {
	let Rig {
		quadz,
		pump,
		transcript,
		..
	} = default_rig();
	quadz.set_aspirate_volume(Probe::Two, 20.0, true).unwrap();
	assert_eq!(pump.lock().status(Side::Right), SyringeStatus::Holding);
	assert_eq!(quadz.channel_state(Probe::Two).unwrap().pending_volume, -20.0);

	quadz.start_pump(Probe::Two, false, true).unwrap();
	assert_eq!(pump.lock().volume(Side::Right), 20.0);
	let state = quadz.channel_state(Probe::Two).unwrap();
	assert_eq!(state.pending_volume, 0.0);
	assert_eq!(state.current_volume, 20.0);

	quadz.set_dispense_volume(Probe::One, 5.0, false).unwrap();
	assert_eq!(quadz.channel_state(Probe::One).unwrap().pending_volume, 5.0);
	quadz.halt_pump(Probe::One, false).unwrap();
	assert_eq!(quadz.channel_state(Probe::One).unwrap().pending_volume, 0.0);

	quadz.initialize_syringe(Probe::One, true, true).unwrap();
	assert_eq!(pump.lock().volume(Side::Right), 0.0);
	assert_eq!(
		quadz.channel_state(Probe::One).unwrap().status,
		SyringeStatus::Ready
	);
	quadz.halt_pump(Probe::One, false).unwrap();
	quadz.synchronize_pump(Probe::One).unwrap();
	quadz.wait_for_buffered().unwrap();

	let sent: Vec<_> = transcript
		.buffered()
		.into_iter()
		.map(|(_, instruction)| instruction)
		.collect();
	assert_eq!(
		sent,
		vec!["AR20.0", "BR", "DL5.0", "NL", "OB", "NL", "TL"]
	);
}

#[test]
fn configuration_is_cached() {
	let Rig { quadz, pump, .. } = default_rig();
	quadz.set_flow_rate(Probe::One, 2.5).unwrap();
	quadz.set_motor_force(Probe::Two, 5).unwrap();
	quadz.set_syringe_size(Probe::One, 500, true).unwrap();
	quadz.wait_for_buffered().unwrap();
	{
		let pump = pump.lock();
		assert_eq!(pump.flow_rate(Side::Left), "2.5");
		assert_eq!(pump.motor_force(Side::Right), 5);
		assert_eq!(pump.syringe_size(Side::Left), 500);
		assert_eq!(pump.syringe_size(Side::Right), 500);
	}
	let left = quadz.channel_state(Probe::One).unwrap();
	assert_eq!(left.flow_rate, 2.5);
	assert_eq!(left.syringe_size, 500);
	let right = quadz.channel_state(Probe::Two).unwrap();
	assert_eq!(right.motor_force, 5);
	assert_eq!(right.syringe_size, 500);
}

#[test]
fn blocking_valve_switch_polls_until_done() {
	let Rig {
		quadz,
		pump,
		transcript,
		..
	} = rig(SimController::new(), SimPump::new().with_valve_polls(3));
	quadz.set_valve(Probe::One, Valve::Reservoir, true).unwrap();
	assert_eq!(pump.lock().valve(Side::Left), Valve::Reservoir);
	assert_eq!(
		quadz.channel_state(Probe::One).unwrap().valve,
		Valve::Reservoir
	);
	let valve_polls = transcript
		.immediates(PUMP)
		.iter()
		.filter(|&&c| c == 'V')
		.count();
	assert_eq!(valve_polls, 3);

	quadz
		.set_valves(&[None, Some(Valve::Reservoir)])
		.unwrap();
	assert_eq!(quadz.valve_status(Probe::Two).unwrap(), Valve::Reservoir);
	assert_eq!(pump.lock().valve(Side::Left), Valve::Reservoir);
}

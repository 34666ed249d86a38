use gsioc::{
    bus::BusOptions,
    sim::{Motion, SimBus, SimController, SimPump},
    syringe::Side,
    ControlOptions, Probe, QuadZ,
};
use simple_logger::SimpleLogger;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable logging
    SimpleLogger::new().init().unwrap();

    // A liquid handler at 22 and a full pump at 1, on an in-memory bus
    let sim = SimBus::new()
        .with_device(22, SimController::new().with_motion(Motion::Stepped(250)))
        .with_device(
            1,
            SimPump::new()
                .with_volume(Side::Left, 400.0)
                .with_volume(Side::Right, 400.0),
        );
    let transcript = sim.transcript();
    let bus = BusOptions::new()
        .settle_delay(Duration::ZERO)
        .disconnect_delay(Duration::ZERO)
        .open_backend(sim.into_mock())?;
    let mut options = ControlOptions::new();
    options.poll_interval(Duration::from_millis(5));
    let quadz = QuadZ::from_bus(bus, options);

    quadz.initialize()?;
    quadz.add_pump(1, Probe::One, Probe::Two)?;
    quadz.move_to(1000, 1500, Probe::One, Duration::from_secs(1))?;
    quadz.move_probe(-40, &[Probe::One, Probe::Two], false, Duration::from_secs(1))?;
    quadz.pump(&[150.0, 75.5])?;
    for probe in [Probe::One, Probe::Two] {
        let (status, volume) = quadz.pump_status(probe)?;
        println!("probe {probe}: {status} {volume} uL");
    }
    for (address, instruction) in transcript.buffered() {
        println!("{address}: {instruction}");
    }
    Ok(())
}

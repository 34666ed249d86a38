use gsioc::{syringe::Valve, Probe, QuadZ};
use simple_logger::SimpleLogger;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Enable logging
    SimpleLogger::new().init().unwrap();

    let port_path = "/dev/ttyUSB0";
    let pump = 1;

    // Open the port and register the liquid handler and its pump
    let quadz = QuadZ::open_serial(port_path)?;
    quadz.initialize()?;
    println!("{}", quadz.version()?);
    quadz.add_pump(pump, Probe::One, Probe::Two)?;
    quadz.set_syringe_size(Probe::One, 500, true)?;
    quadz.initialize_syringe(Probe::One, true, true)?;

    // Draw from the reservoir, then deliver through the probes.
    quadz.set_valves(&[Some(Valve::Reservoir), Some(Valve::Reservoir)])?;
    quadz.pump(&[-200.0, -200.0])?;
    quadz.set_valves(&[Some(Valve::Needle), Some(Valve::Needle)])?;

    quadz.home()?;
    quadz.move_to(250, 1200, Probe::One, Duration::from_secs(10))?;
    quadz.move_probe(-40, &[Probe::One, Probe::Two], true, Duration::from_secs(5))?;
    quadz.pump(&[150.0, 150.0])?;
    quadz.move_probe(0, &[Probe::One, Probe::Two], false, Duration::from_secs(5))?;
    Ok(())
}

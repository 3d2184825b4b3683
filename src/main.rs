//! NoiseInverter - real-time inverted-delay noise cancellation
//!
//! Entry point: interactive text menu, or a one-shot run when devices are
//! given on the command line.

use anyhow::Result;
use noiseinverter::audio::cpal_backend::CpalDeviceLayer;
use noiseinverter::audio::simulated::SimulatedDeviceLayer;
use noiseinverter::{
    AppConfig, AudioDeviceDescriptor, DeviceId, DeviceLayer, Direction, ParameterUpdate,
    StreamController,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Command line options
#[derive(Debug, Default)]
struct Options {
    config_path: Option<PathBuf>,
    input: Option<DeviceId>,
    output: Option<DeviceId>,
    simulate: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("noiseinverter=info".parse().unwrap())
                .add_directive("noiseinverter_core=info".parse().unwrap()),
        )
        .init();

    println!("╔════════════════════════════════════════════════════════════╗");
    println!(
        "║        NoiseInverter v{} - Inverted-delay cancellation     ║",
        noiseinverter::VERSION
    );
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();
    let mut options = Options::default();
    let mut list_only = false;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--list" | "-l" => list_only = true,
            "--simulate" | "-s" => options.simulate = true,
            "--version" | "-v" => {
                println!(
                    "noiseinverter {} (built {})",
                    noiseinverter::VERSION,
                    noiseinverter::BUILD_DATE
                );
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            flag @ ("--input" | "-i" | "--output" | "-o" | "--config" | "-c") => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: {} requires a value", flag);
                    return Ok(());
                };
                match flag {
                    "--config" | "-c" => options.config_path = Some(PathBuf::from(value)),
                    _ => {
                        let Ok(numeric) = value.parse::<u32>() else {
                            eprintln!("Error: Invalid device id: {}", value);
                            return Ok(());
                        };
                        let id = DeviceId::from_numeric(numeric);
                        if matches!(flag, "--input" | "-i") {
                            options.input = Some(id);
                        } else {
                            options.output = Some(id);
                        }
                    }
                }
                i += 2;
                continue;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(());
            }
        }
        i += 1;
    }

    let config_path = options.config_path.clone().unwrap_or_else(AppConfig::path);
    let mut config = AppConfig::load_from(&config_path);
    if let Err(e) = config.validate() {
        warn!(path = %config_path.display(), error = %e, "Invalid config, using defaults");
        config = AppConfig::default();
    }

    let layer: Box<dyn DeviceLayer> = if options.simulate {
        info!("Using simulated audio device");
        Box::new(SimulatedDeviceLayer::new())
    } else {
        Box::new(CpalDeviceLayer::new())
    };
    let mut controller = StreamController::new(layer, &config);

    if list_only {
        list_devices(&controller);
        return Ok(());
    }

    if options.input.is_some() || options.output.is_some() {
        let devices = controller.list_devices().unwrap_or_default();
        let input = options
            .input
            .or_else(|| default_device(&devices, Direction::Input));
        let output = options
            .output
            .or_else(|| default_device(&devices, Direction::Output));
        let (Some(input), Some(output)) = (input, output) else {
            println!("Error: No default device available. Use --list to see device ids.");
            return Ok(());
        };
        return run_with_devices(&mut controller, input, output);
    }

    interactive_mode(&mut controller, config, &config_path)
}

fn print_help() {
    println!("Usage: noiseinverter [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -l, --list              List audio devices with their ids");
    println!("  -i, --input ID          Start with the given input device id");
    println!("  -o, --output ID         Start with the given output device id");
    println!("  -c, --config PATH       Use a config file other than the default");
    println!("  -s, --simulate          Use a simulated device instead of hardware");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Output device ids are the physical index plus {}.", noiseinverter::OUTPUT_ID_OFFSET);
    println!();
    println!("Examples:");
    println!("  noiseinverter --list");
    println!("  noiseinverter -i 0 -o 1000");
    println!("  noiseinverter --simulate -i 0");
    println!();
    println!("Without device arguments, starts in interactive mode.");
}

fn default_device(devices: &[AudioDeviceDescriptor], direction: Direction) -> Option<DeviceId> {
    devices
        .iter()
        .filter(|d| d.direction() == direction)
        .find(|d| d.is_default)
        .or_else(|| devices.iter().find(|d| d.direction() == direction))
        .map(|d| d.id)
}

fn list_devices(controller: &StreamController) {
    match controller.list_devices() {
        Ok(devices) => {
            if devices.is_empty() {
                println!("No audio devices found.");
                return;
            }
            for (title, direction) in [("Input devices", Direction::Input), ("Output devices", Direction::Output)] {
                println!("=== {} ===", title);
                for device in devices.iter().filter(|d| d.direction() == direction) {
                    let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
                    println!("  {}: {}{}", device.id, device.name, default_marker);
                    println!("     Channels: {}", device.max_channels);
                    if !device.sample_rates.is_empty() {
                        println!("     Sample rates: {:?}", device.sample_rates);
                    }
                }
                println!();
            }
        }
        Err(e) => {
            error!("Failed to list devices: {}", e);
            println!("Error: {}", e);
        }
    }
}

fn run_with_devices(
    controller: &mut StreamController,
    input: DeviceId,
    output: DeviceId,
) -> Result<()> {
    println!("Starting: input {} -> output {}", input, output);

    if let Err(e) = controller.start(input, output) {
        println!("Error: {}", e);
        println!();
        println!("Use --list to see available devices.");
        return Ok(());
    }

    println!("Processing started. Press Ctrl+C to stop.");
    println!();
    println!("Status:");
    println!("────────────────────────────────────────");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .ok();

    let mut last_status = String::new();
    while running.load(Ordering::SeqCst) {
        let status_line = status_line(controller);
        if status_line != last_status {
            println!("{}", status_line);
            last_status = status_line;
        }
        std::thread::sleep(Duration::from_millis(500));
    }

    println!();
    println!("Stopping...");
    controller.stop()?;
    println!("Done.");
    Ok(())
}

fn status_line(controller: &StreamController) -> String {
    let mix = controller.mix_params();
    let (input, output) = controller.visualization_data();
    let peak = |v: &[f32]| v.iter().fold(0.0f32, |m, x| m.max(x.abs()));
    format!(
        "Latency: {:>6.2}ms | CPU: {:>5.1}% | Delay: {:>5.2}ms | Gain: {:.2} | In peak: {:.3} | Out peak: {:.3}",
        controller.latency_ms(),
        controller.cpu_load_percent(),
        mix.delay_ms,
        mix.gain,
        peak(&input),
        peak(&output)
    )
}

fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Read a number; empty or invalid input counts as "unchanged" (-1)
fn prompt_number(message: &str) -> Result<f32> {
    Ok(prompt(message)?.parse().unwrap_or(-1.0))
}

fn print_menu() {
    println!();
    println!("=== NoiseInverter Menu ===");
    println!("1. List audio devices");
    println!("2. Start processing");
    println!("3. Calibrate");
    println!("4. Change parameters");
    println!("5. Stop");
    println!("6. Show health statistics");
    println!("0. Quit");
}

fn interactive_mode(
    controller: &mut StreamController,
    mut config: AppConfig,
    config_path: &std::path::Path,
) -> Result<()> {
    loop {
        print_menu();
        let choice = prompt("Choice: ")?;

        match choice.as_str() {
            "1" => list_devices(controller),
            "2" => {
                if controller.is_running() {
                    println!("Processing is already running.");
                    continue;
                }
                let devices = controller.list_devices().unwrap_or_default();
                let default_input = config
                    .input_device
                    .map(DeviceId::from_numeric)
                    .or_else(|| default_device(&devices, Direction::Input));
                let default_output = config
                    .output_device
                    .map(DeviceId::from_numeric)
                    .or_else(|| default_device(&devices, Direction::Output));

                let input = select_device("Input device", default_input)?;
                let output = select_device("Output device", default_output)?;
                let (Some(input), Some(output)) = (input, output) else {
                    println!("No device selected.");
                    continue;
                };

                println!("Starting processing...");
                match controller.start(input, output) {
                    Ok(()) => {
                        println!("Processing started.");
                        config.input_device = Some(input.numeric());
                        config.output_device = Some(output.numeric());
                        if let Err(e) = config.save(config_path) {
                            warn!("Failed to save device selection: {}", e);
                        }
                    }
                    Err(e) => println!("Failed to start processing: {}", e),
                }
            }
            "3" => {
                if !controller.is_running() {
                    println!("Start processing first.");
                    continue;
                }
                let (delay_ms, gain) = controller.calibrate();
                println!("Calibration done: delay = {:.2} ms, gain = {:.2}", delay_ms, gain);
            }
            "4" => {
                if !controller.is_running() {
                    println!("Start processing first.");
                    continue;
                }
                let delay = prompt_number("New delay (ms, -1 to keep): ")?;
                let gain = prompt_number("New gain (0-1, -1 to keep): ")?;
                let low = prompt_number("New low frequency (Hz, -1 to keep): ")?;
                let high = prompt_number("New high frequency (Hz, -1 to keep): ")?;
                let family = prompt_number(
                    "Filter type (0=bandpass, 1=lowpass, 2=highpass, -1 to keep): ",
                )? as i32;
                controller.set_parameters(ParameterUpdate::from_sentinels(
                    delay, gain, low, high, family,
                ));
                println!("Parameters updated.");
            }
            "5" => {
                if !controller.is_running() {
                    println!("Processing is not running.");
                    continue;
                }
                println!("Stopping processing...");
                if let Err(e) = controller.stop() {
                    println!("Stop reported an error: {}", e);
                }
                println!("Processing stopped.");
            }
            "6" => {
                let summary = controller.health_summary();
                if summary.sample_count == 0 {
                    println!("No health samples yet.");
                } else {
                    println!(
                        "CPU load: current {:.1}%, min {:.1}%, max {:.1}%, avg {:.1}%",
                        summary.current_cpu_load,
                        summary.min_cpu_load,
                        summary.max_cpu_load,
                        summary.avg_cpu_load
                    );
                    println!(
                        "Latency: {:.2} ms | Samples: {} | Uptime: {}s",
                        summary.latency_ms, summary.sample_count, summary.uptime_seconds
                    );
                }
            }
            "0" => {
                if controller.is_running() {
                    println!("Stopping processing...");
                    controller.stop()?;
                }
                println!("Goodbye!");
                return Ok(());
            }
            _ => println!("Invalid choice, please try again."),
        }

        if controller.is_running() {
            println!("{}", status_line(controller));
        }
    }
}

fn select_device(label: &str, default: Option<DeviceId>) -> Result<Option<DeviceId>> {
    let shown = default.map_or_else(|| "none".to_string(), |id| id.to_string());
    let answer = prompt(&format!("{} (default={}): ", label, shown))?;
    if answer.is_empty() {
        return Ok(default);
    }
    match answer.parse::<u32>() {
        Ok(numeric) => Ok(Some(DeviceId::from_numeric(numeric))),
        Err(_) => {
            println!("Invalid device id: {}", answer);
            Ok(default)
        }
    }
}

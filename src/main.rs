mod cli;

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use modular_rack::nodes::{create_module, ModuleType, Waveform};
use modular_rack::{AudioEngine, EngineConfig, NodeId, Patch};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Tone { frequency, waveform, volume, seconds } => {
            let mut engine = AudioEngine::new(config)?;
            let out = engine.patch().output_id();
            let vco = add_oscillator(engine.patch_mut(), frequency, waveform)?;
            engine.patch_mut().connect(vco, out, "in")?;
            engine.patch().set_parameter(out, "volume", volume)?;

            engine.start().context("Failed to start audio")?;
            println!(
                "Playing {:?} at {} Hz for {} s on {}",
                waveform,
                frequency,
                seconds,
                engine.device_name().unwrap_or("unknown device")
            );
            sleep_seconds(seconds);
            engine.stop()?;
        }

        Commands::Envelope { frequency, waveform, attack, decay, sustain, release, hold } => {
            let mut engine = AudioEngine::new(config)?;
            let out = engine.patch().output_id();
            let vco = add_oscillator(engine.patch_mut(), frequency, waveform)?;

            let patch = engine.patch_mut();
            let vca = patch.add_module(ModuleType::Amplifier);
            let env = patch.add_module(ModuleType::Envelope);
            patch.connect(vco, vca, "audio")?;
            patch.connect(env, vca, "cv")?;
            patch.connect(vca, out, "in")?;
            for (name, value) in [("attack", attack), ("decay", decay), ("sustain", sustain), ("release", release)] {
                patch.set_parameter(env, name, value)?;
            }
            let envelope = patch
                .envelope(env)
                .context("Envelope module missing from patch")?;

            engine.start().context("Failed to start audio")?;
            envelope.set_gate(true);
            info!("Gate open");
            sleep_seconds(hold);

            envelope.set_gate(false);
            info!("Gate closed");
            let tail = if release.is_finite() { release.max(0.0) } else { 0.0 };
            let deadline = Instant::now() + Duration::from_secs_f32(tail + 0.5);
            while envelope.state().is_active() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            println!("Envelope finished in state {:?}", envelope.state());
            engine.stop()?;
        }

        Commands::Render { frequency, waveform, samples } => {
            let mut engine = AudioEngine::new(config)?;
            let out = engine.patch().output_id();
            let vco = add_oscillator(engine.patch_mut(), frequency, waveform)?;
            engine.patch_mut().connect(vco, out, "in")?;
            engine.patch().set_parameter(out, "volume", 1.0)?;

            let mut renderer = engine.renderer();
            let mut buffer = vec![0.0f32; samples];
            renderer.fill(&mut buffer, 0, samples);

            let peak = buffer.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
            let rms = if samples == 0 {
                0.0
            } else {
                (buffer.iter().map(|s| s * s).sum::<f32>() / samples as f32).sqrt()
            };
            let stats = engine.stats();
            println!("Rendered {} samples at {} Hz", samples, engine.config().sample_rate);
            println!("  Peak: {:.4}", peak);
            println!("  RMS:  {:.4}", rms);
            println!("  Blocks: {} (failed: {})", stats.blocks, stats.failed_blocks);
        }

        Commands::Devices => {
            let devices = AudioEngine::list_output_devices()?;
            if devices.is_empty() {
                println!("No output devices found");
            } else {
                println!("Output devices:");
                for name in devices {
                    println!("  {}", name);
                }
            }
        }

        Commands::Info { module: None, .. } => {
            println!("Module types:");
            for module_type in ModuleType::ALL {
                println!("  {:<10} {}", format!("{:?}", module_type).to_lowercase(), module_type);
            }
        }

        Commands::Info { module: Some(module_type), json } => {
            let module = create_module(module_type, &config);
            let node_info = module.node_info();
            if json {
                println!("{}", serde_json::to_string_pretty(node_info)?);
                return Ok(());
            }

            println!("Node: {} ({})", node_info.name, node_info.node_type);
            println!("{}", node_info.description);
            if !node_info.input_ports.is_empty() {
                println!("Input Ports:");
                for port in &node_info.input_ports {
                    println!("  {:<6} {:<8} {:?}", port.name, port.label, port.port_type);
                }
            }
            println!("Output Ports:");
            for port in &node_info.output_ports {
                println!("  {:<6} {:<8} {:?}", port.name, port.label, port.port_type);
            }
            println!("Parameters:");
            for descriptor in module.parameters().get_parameter_descriptors() {
                println!(
                    "  {:<8} {} .. {} (default {})",
                    descriptor.name(),
                    descriptor.format_value(descriptor.min_value()),
                    descriptor.format_value(descriptor.max_value()),
                    descriptor.format_value(descriptor.default_value()),
                );
            }
        }

        Commands::ShowConfig => {
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}

fn add_oscillator(patch: &mut Patch, frequency: f32, waveform: Waveform) -> Result<NodeId> {
    let vco = patch.add_module(ModuleType::Oscillator);
    let oscillator = patch
        .oscillator(vco)
        .context("Oscillator module missing from patch")?;
    oscillator.set_frequency(frequency);
    oscillator.set_waveform(waveform);
    Ok(vco)
}

fn sleep_seconds(seconds: f32) {
    if seconds.is_finite() && seconds > 0.0 {
        thread::sleep(Duration::from_secs_f32(seconds));
    }
}

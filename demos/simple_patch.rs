//! VCO -> Mixer -> VCA <- ADSR -> Output, rendered offline.
//!
//! Pass `--play` to hear it on the default output device.

use std::thread;
use std::time::Duration;

use modular_rack::nodes::{ModuleType, Waveform};
use modular_rack::{AudioEngine, EngineConfig};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut engine = AudioEngine::new(EngineConfig::default())?;
    let out = engine.patch().output_id();

    let patch = engine.patch_mut();
    let low = patch.add_module(ModuleType::Oscillator);
    let high = patch.add_module(ModuleType::Oscillator);
    let mixer = patch.add_module(ModuleType::Mixer);
    let vca = patch.add_module(ModuleType::Amplifier);
    let env = patch.add_module(ModuleType::Envelope);

    patch.set_parameter(low, "frequency", 220.0)?;
    patch.set_parameter(high, "frequency", 330.0)?;
    if let Some(osc) = patch.oscillator(high) {
        osc.set_waveform(Waveform::Triangle);
    }
    patch.set_parameter(mixer, "vol2", 0.5)?;
    patch.set_parameter(env, "attack", 0.02)?;
    patch.set_parameter(env, "release", 0.3)?;

    patch.connect(low, mixer, "in1")?;
    patch.connect(high, mixer, "in2")?;
    patch.connect(mixer, vca, "audio")?;
    patch.connect(env, vca, "cv")?;
    patch.connect(vca, out, "in")?;

    for connection in patch.connections() {
        println!(
            "{} -> {}:{}",
            patch.node_info(connection.source_node).map_or("?", |info| info.name.as_str()),
            patch.node_info(connection.target_node).map_or("?", |info| info.name.as_str()),
            connection.target_port
        );
    }

    let envelope = patch.envelope(env).ok_or_else(|| anyhow::anyhow!("envelope missing"))?;
    envelope.set_gate(true);

    if std::env::args().any(|arg| arg == "--play") {
        engine.start()?;
        thread::sleep(Duration::from_millis(800));
        envelope.set_gate(false);
        thread::sleep(Duration::from_millis(500));
        engine.stop()?;
        return Ok(());
    }

    let mut renderer = engine.renderer();
    let mut block = vec![0.0f32; 512];
    for index in 0..8 {
        if index == 4 {
            envelope.set_gate(false);
        }
        let len = block.len();
        renderer.fill(&mut block, 0, len);
        let peak = block.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        println!(
            "block {:>2}: peak {:.4}  envelope {:.3} ({:?})",
            index,
            peak,
            envelope.current_value(),
            envelope.state()
        );
    }

    Ok(())
}

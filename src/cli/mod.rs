use std::path::PathBuf;

use clap::{Parser, Subcommand};

use modular_rack::nodes::{ModuleType, Waveform};

#[derive(Parser, Debug)]
#[command(name = "modular-rack")]
#[command(about = "Patchable modular synthesizer core", version)]
pub struct Cli {
    /// Engine config file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Play an oscillator straight into the output
    Tone {
        /// Frequency in Hz
        #[arg(short, long, default_value_t = 440.0)]
        frequency: f32,
        /// Waveform (sine, square, saw, triangle)
        #[arg(short, long, default_value = "sine")]
        waveform: Waveform,
        /// Output volume (0.0 - 1.0)
        #[arg(long, default_value_t = 0.2)]
        volume: f32,
        /// Playback time in seconds
        #[arg(short, long, default_value_t = 2.0)]
        seconds: f32,
    },
    /// Play VCO -> VCA <- ADSR and open the gate once
    Envelope {
        #[arg(short, long, default_value_t = 220.0)]
        frequency: f32,
        #[arg(short, long, default_value = "saw")]
        waveform: Waveform,
        /// Attack time in seconds
        #[arg(long, default_value_t = 0.1)]
        attack: f32,
        /// Decay time in seconds
        #[arg(long, default_value_t = 0.1)]
        decay: f32,
        /// Sustain level (0.0 - 1.0)
        #[arg(long, default_value_t = 0.8)]
        sustain: f32,
        /// Release time in seconds
        #[arg(long, default_value_t = 0.5)]
        release: f32,
        /// How long the gate stays open, in seconds
        #[arg(long, default_value_t = 1.0)]
        hold: f32,
    },
    /// Render a tone offline and print level statistics
    Render {
        #[arg(short, long, default_value_t = 440.0)]
        frequency: f32,
        #[arg(short, long, default_value = "sine")]
        waveform: Waveform,
        /// Number of samples to render
        #[arg(short = 'n', long, default_value_t = 44100)]
        samples: usize,
    },
    /// List output devices
    Devices,
    /// Show module types, or the ports and parameters of one type
    Info {
        /// Module type (vco, adsr, mixer, vca)
        module: Option<ModuleType>,
        /// Print node information as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective engine config as TOML
    ShowConfig,
}

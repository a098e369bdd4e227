//! midisynth - Renders MIDI files to WAV through the MIDI decoder.
//!
//! The binary drives the decoder exactly like a host player would: init,
//! then open / decode / close for every file, then destroy.
//!
//! # Usage
//!
//! ```bash
//! midisynth song.mid                       # Writes ./song.wav
//! midisynth -o out/ bank.sf2 a.mid b.mid   # Plays a.mid and b.mid with bank.sf2
//! ```

use anyhow::{bail, Context, Result};
use midisynth::plugin::ErrorSeverity;
use midisynth::{export_to_wav, Decoder, DecoderConfig, EnvOptions, MidiDecoder, SessionState};
use std::path::{Path, PathBuf};

/// Command-line options for the application.
struct CliOptions {
    /// Directory the WAV files are written to.
    output_dir: PathBuf,
    /// SoundFont to start with, overriding configuration.
    soundfont: Option<PathBuf>,
    /// Output sample rate, overriding configuration.
    rate: Option<u32>,
    /// JSON configuration file.
    config: Option<PathBuf>,
    /// Position to seek to before decoding each file.
    start: Option<i32>,
    /// MIDI and SoundFont files, in play order.
    files: Vec<PathBuf>,
}

impl CliOptions {
    /// Parses command-line arguments.
    ///
    /// Supports:
    /// - `--output <dir>` or `-o <dir>`: Where WAV files go (default `.`)
    /// - `--soundfont <path>` or `-sf <path>`: SoundFont to start with
    /// - `--rate <hz>` or `-r <hz>`: Output sample rate
    /// - `--config <file>` or `-c <file>`: JSON configuration file
    /// - `--start <seconds>` or `-s <seconds>`: Seek before decoding
    /// - `--help` or `-h`: Print help and exit
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut options = Self {
            output_dir: PathBuf::from("."),
            soundfont: None,
            rate: None,
            config: None,
            start: None,
            files: Vec::new(),
        };
        let mut i = 1;

        while i < args.len() {
            match args[i].as_str() {
                "--output" | "-o" => options.output_dir = PathBuf::from(value(&args, &mut i)?),
                "--soundfont" | "-sf" => {
                    options.soundfont = Some(PathBuf::from(value(&args, &mut i)?))
                }
                "--rate" | "-r" => {
                    let rate = value(&args, &mut i)?;
                    options.rate = Some(
                        rate.parse()
                            .with_context(|| format!("Invalid sample rate: {}", rate))?,
                    );
                }
                "--config" | "-c" => options.config = Some(PathBuf::from(value(&args, &mut i)?)),
                "--start" | "-s" => {
                    let start = value(&args, &mut i)?;
                    options.start = Some(
                        start
                            .parse()
                            .with_context(|| format!("Invalid start position: {}", start))?,
                    );
                }
                "--help" | "-h" => {
                    print_help(args.first().map(String::as_str).unwrap_or("midisynth"));
                    std::process::exit(0);
                }
                other if other.starts_with('-') && other.len() > 1 => {
                    eprintln!("Unknown option: {}", other);
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
                file => options.files.push(PathBuf::from(file)),
            }
            i += 1;
        }

        if options.files.is_empty() {
            bail!("No input files given; use --help for usage information");
        }
        Ok(options)
    }

    /// Builds the decoder configuration: JSON file or environment, then flags.
    fn decoder_config(&self) -> Result<DecoderConfig> {
        let mut config = match &self.config {
            Some(path) => DecoderConfig::load_json(path)?,
            None => DecoderConfig::from_options(&EnvOptions)?,
        };
        if let Some(soundfont) = &self.soundfont {
            config.soundfont = Some(soundfont.clone());
        }
        if let Some(rate) = self.rate {
            config.sample_rate = rate;
        }
        Ok(config)
    }
}

/// Returns the argument following option `args[*i]`.
fn value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str> {
    let option = &args[*i];
    *i += 1;
    match args.get(*i) {
        Some(arg) => Ok(arg.as_str()),
        None => bail!("{} requires an argument", option),
    }
}

fn print_help(program: &str) {
    eprintln!("midisynth - Render MIDI files with a SoundFont");
    eprintln!();
    eprintln!("Usage: {} [OPTIONS] FILES...", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -o, --output DIR        Write WAV files into DIR (default: .)");
    eprintln!("  -sf, --soundfont PATH   SoundFont to start with (.sf2)");
    eprintln!("  -r, --rate HZ           Output sample rate (default: 44100)");
    eprintln!("  -c, --config FILE       Read settings from a JSON file");
    eprintln!("  -s, --start SECONDS     Start each file at SECONDS");
    eprintln!("  -h, --help              Print this help message");
    eprintln!();
    eprintln!("SoundFont files among FILES switch the SoundFont for the files after them.");
    eprintln!("Without a configured SoundFont, MIDISYNTH_SOUNDFONT or a system bank is used.");
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = cli.decoder_config().context("Failed to read configuration")?;
    std::fs::create_dir_all(&cli.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            cli.output_dir.display()
        )
    })?;

    let mut decoder = MidiDecoder::with_config(config);
    decoder
        .init()
        .context("Failed to initialize the MIDI decoder")?;

    let mut failed = 0;
    for file in &cli.files {
        if let Err(e) = render_file(&decoder, file, &cli) {
            eprintln!("{}: {:#}", file.display(), e);
            tracing::error!("Rendering {:?} failed: {:?}", file, e);
            failed += 1;
        }
    }

    decoder.destroy();

    if failed > 0 {
        bail!("{} of {} files failed", failed, cli.files.len());
    }
    Ok(())
}

/// Opens one file and, if it is a MIDI file, writes it out as WAV.
fn render_file(decoder: &MidiDecoder, file: &Path, cli: &CliOptions) -> Result<()> {
    let mut stream = decoder.open(file);

    let error = decoder.error(&stream);
    if error.severity == ErrorSeverity::Fatal {
        decoder.close(stream);
        bail!(error);
    }

    if stream.session().map(|s| s.state()) == Some(SessionState::SoundfontOnly) {
        eprintln!("Using SoundFont {}", file.display());
        decoder.close(stream);
        return Ok(());
    }

    if let Some(start) = cli.start {
        let reached = decoder.seek(&mut stream, start);
        if reached < 0 {
            eprintln!("{}: cannot seek to {}s, starting from the top", file.display(), start);
        }
    }

    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("track");
    let output_path = cli.output_dir.join(format!("{}.wav", stem));

    let name = file.display().to_string();
    let mut last_percent = -1i32;
    let result = export_to_wav(
        decoder,
        &mut stream,
        &output_path,
        Some(|progress: f32| {
            let percent = (progress * 100.0) as i32;
            if percent / 10 != last_percent / 10 {
                eprint!("\r{}: {:3}%", name, percent);
                last_percent = percent;
            }
        }),
    );
    eprintln!();
    decoder.close(stream);

    let summary = result?;
    println!(
        "{} -> {} ({:.1}s)",
        file.display(),
        output_path.display(),
        summary.seconds()
    );
    Ok(())
}

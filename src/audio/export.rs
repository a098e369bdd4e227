//! Audio export functionality.
//!
//! Writes everything a decoder stream produces into a 16-bit WAV file, the
//! same way a host would pull PCM out of it.

use crate::audio::{SoundParams, BYTES_PER_FRAME};
use crate::plugin::Decoder;
use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;

/// Buffer size for rendering chunks, in frames.
const RENDER_BUFFER_FRAMES: usize = 4096;

/// What an export produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportSummary {
    pub frames: u64,
    pub sample_rate: u32,
}

impl ExportSummary {
    /// Length of the written audio in seconds.
    pub fn seconds(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }
}

/// Decodes `stream` to its end and writes the PCM to a WAV file.
///
/// # Arguments
///
/// * `decoder` - The decoder the stream was opened with
/// * `stream` - An open stream, decoded from its current position
/// * `output_path` - Path for the output WAV file
/// * `progress_callback` - Optional callback for progress updates (0.0 to 1.0)
///
/// # Errors
///
/// Returns error if:
/// - Output file cannot be created
/// - Writing a sample fails
pub fn export_to_wav<D, P, F>(
    decoder: &D,
    stream: &mut D::Stream,
    output_path: P,
    mut progress_callback: Option<F>,
) -> Result<ExportSummary>
where
    D: Decoder,
    P: AsRef<Path>,
    F: FnMut(f32),
{
    let output_path = output_path.as_ref();
    let mut buf = vec![0u8; RENDER_BUFFER_FRAMES * BYTES_PER_FRAME];
    let mut params = SoundParams::s16_stereo(0);

    // The first decode reports the layout the writer needs
    let mut written = decoder.decode(stream, &mut buf, &mut params);

    let spec = WavSpec {
        channels: params.channels,
        sample_rate: params.rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(output_path, spec)
        .with_context(|| format!("Failed to create output WAV file: {}", output_path.display()))?;

    let duration = decoder.duration(stream);
    let total_frames = (duration > 0).then(|| duration as u64 * params.rate as u64);
    let mut frames = 0u64;

    while written > 0 {
        for sample in buf[..written].chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
        }
        frames += (written / BYTES_PER_FRAME) as u64;

        if let (Some(callback), Some(total)) = (progress_callback.as_mut(), total_frames) {
            callback((frames as f32 / total as f32).min(1.0));
        }

        written = decoder.decode(stream, &mut buf, &mut params);
    }

    writer.finalize().context("Failed to finalize WAV file")?;

    if let Some(callback) = progress_callback.as_mut() {
        callback(1.0);
    }

    Ok(ExportSummary {
        frames,
        sample_rate: params.rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticOptions;
    use crate::midi::fixtures::{self, FixtureNote};
    use crate::plugin::MidiDecoder;
    use std::sync::Arc;

    fn decoder() -> MidiDecoder {
        let mut decoder =
            MidiDecoder::new(Arc::new(StaticOptions::new())).without_system_soundfonts();
        decoder.init().unwrap();
        decoder
    }

    #[test]
    fn test_export_writes_whole_track() {
        let dir = tempfile::tempdir().unwrap();
        let song = fixtures::write_smf(
            dir.path(),
            "song.mid",
            &[FixtureNote::new(0, 480, 60), FixtureNote::new(960, 480, 67)],
        );
        let output = dir.path().join("song.wav");

        let decoder = decoder();
        let mut stream = decoder.open(&song);
        let mut progress = Vec::new();
        let summary =
            export_to_wav(&decoder, &mut stream, &output, Some(|p: f32| progress.push(p))).unwrap();
        decoder.close(stream);

        // Last event at 1.5s
        assert!(summary.seconds() >= 1.5);
        assert!(summary.seconds() < 1.5 + 2.0 * RENDER_BUFFER_FRAMES as f64 / 44100.0);
        assert_eq!(progress.last(), Some(&1.0));
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));

        let reader = hound::WavReader::open(&output).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.duration() as u64, summary.frames);
    }

    #[test]
    fn test_export_of_inert_stream_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let bank = fixtures::write_soundfont_stub(dir.path(), "bank.sf2");
        let output = dir.path().join("bank.wav");

        let decoder = decoder();
        let mut stream = decoder.open(&bank);
        let summary = export_to_wav(&decoder, &mut stream, &output, None::<fn(f32)>).unwrap();
        decoder.close(stream);

        assert_eq!(summary.frames, 0);
        assert_eq!(hound::WavReader::open(&output).unwrap().duration(), 0);
    }

    #[test]
    fn test_export_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let song = fixtures::write_smf(dir.path(), "song.mid", &[FixtureNote::new(0, 480, 60)]);

        let decoder = decoder();
        let mut stream = decoder.open(&song);
        let result = export_to_wav(
            &decoder,
            &mut stream,
            dir.path().join("missing").join("song.wav"),
            None::<fn(f32)>,
        );
        assert!(result.is_err());
        decoder.close(stream);
    }
}

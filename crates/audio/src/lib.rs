//! Audio mux binding.
//!
//! Thin wrapper over `ffmpeg`/`ffprobe` subprocesses: stream metadata
//! probing, silence padding, and N-way mixdown. Filter graphs are expressed
//! as `-af` / `-filter_complex` argument strings; no codec work happens in
//! this process.

mod mixdown;
mod probe;
mod runner;

pub use mixdown::{mixdown_args, mixdown_files, MixdownOutput};
pub use probe::{probe_duration, probe_sample_rate, probe_start_time};
pub use runner::run_ffmpeg;

use std::path::Path;

use async_trait::async_trait;

/// The muxing seam as the pipeline sees it.
///
/// Production goes through the ffmpeg subprocess wrapper; tests substitute
/// an in-memory implementation.
#[async_trait]
pub trait AudioMux: Send + Sync {
    /// Stream start time in seconds; 0.0 means no padding needed.
    async fn probe_start_time(&self, input: &str) -> f64;

    /// Pad `input_url` with `delay_ms` of leading silence into `output`.
    async fn pad_track(
        &self,
        input_url: &str,
        output: &Path,
        delay_ms: u64,
    ) -> rf_domain::Result<()>;

    /// Mix the inputs into a single MP3 at `output`.
    async fn mixdown(&self, inputs: &[String], output: &Path)
        -> rf_domain::Result<MixdownOutput>;
}

/// ffmpeg/ffprobe-backed implementation.
pub struct FfmpegMux;

#[async_trait]
impl AudioMux for FfmpegMux {
    async fn probe_start_time(&self, input: &str) -> f64 {
        probe::probe_start_time(input).await
    }

    async fn pad_track(
        &self,
        input_url: &str,
        output: &Path,
        delay_ms: u64,
    ) -> rf_domain::Result<()> {
        pad_track_file(input_url, output, delay_ms).await
    }

    async fn mixdown(
        &self,
        inputs: &[String],
        output: &Path,
    ) -> rf_domain::Result<MixdownOutput> {
        mixdown_files(inputs, output).await
    }
}

/// Opus output parameters for padded tracks.
pub const OPUS_STANDARD_SAMPLE_RATE: u32 = 48_000;
pub const OPUS_DEFAULT_BIT_RATE: &str = "64k";

/// MP3 bitrate of the final mixdown.
pub const MP3_BIT_RATE: &str = "192k";

pub use probe::delay_ms_for_start_time;

/// Pad one audio track with leading silence so its media time lines up
/// with the meeting clock.
///
/// Re-encodes to Opus 48 kHz stereo in a WebM container. The `aresample`
/// stage with `async=1` squeezes out timestamp gaps before the delay is
/// applied.
pub async fn pad_track_file(
    input_url: &str,
    output_path: &std::path::Path,
    delay_ms: u64,
) -> rf_domain::Result<()> {
    let args = pad_args(input_url, output_path, delay_ms);
    run_ffmpeg(&args).await
}

/// Build the ffmpeg argument list for track padding.
pub fn pad_args(input_url: &str, output_path: &std::path::Path, delay_ms: u64) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        input_url.to_string(),
        "-af".to_string(),
        format!("aresample=async=1,adelay=delays={delay_ms}|{delay_ms}:all=1"),
        "-c:a".to_string(),
        "libopus".to_string(),
        "-b:a".to_string(),
        OPUS_DEFAULT_BIT_RATE.to_string(),
        "-ar".to_string(),
        OPUS_STANDARD_SAMPLE_RATE.to_string(),
        "-ac".to_string(),
        "2".to_string(),
        "-f".to_string(),
        "webm".to_string(),
        output_path.to_string_lossy().to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn pad_args_carry_delay_and_opus_settings() {
        let args = pad_args("https://s/track.webm", Path::new("/tmp/out.webm"), 1203);
        let joined = args.join(" ");
        assert!(joined.contains("adelay=delays=1203|1203:all=1"));
        assert!(joined.contains("aresample=async=1"));
        assert!(joined.contains("libopus"));
        assert!(joined.contains("-b:a 64k"));
        assert!(joined.contains("-ar 48000"));
    }
}

//! N-way mixdown of padded tracks into a single MP3.

use std::path::Path;

use rf_domain::{Error, Result};

use crate::probe::{probe_duration, probe_sample_rate};
use crate::runner::run_ffmpeg;
use crate::MP3_BIT_RATE;

#[derive(Debug, Clone, PartialEq)]
pub struct MixdownOutput {
    /// Duration of the mixed file, seconds.
    pub duration: f64,
    pub size: u64,
    pub sample_rate: u32,
}

/// Mix the given inputs into `output_path`.
///
/// The target sample rate is taken from the first input with a decodable
/// audio stream; with no decodable input the mixdown fails (there would be
/// nothing to transcribe downstream). `normalize=0` keeps the level of N
/// inputs instead of dividing by N.
pub async fn mixdown_files(inputs: &[String], output_path: &Path) -> Result<MixdownOutput> {
    if inputs.is_empty() {
        return Err(Error::Validation("mixdown requires at least one input".into()));
    }

    let mut sample_rate = None;
    for input in inputs {
        if let Some(rate) = probe_sample_rate(input).await {
            sample_rate = Some(rate);
            break;
        }
    }
    let sample_rate = sample_rate
        .ok_or_else(|| Error::Protocol("mixdown: no decodable audio frames in any track".into()))?;

    let args = mixdown_args(inputs, output_path, sample_rate);
    run_ffmpeg(&args).await?;

    let size = tokio::fs::metadata(output_path).await?.len();
    let duration = probe_duration(&output_path.to_string_lossy()).await?;

    Ok(MixdownOutput {
        duration,
        size,
        sample_rate,
    })
}

/// Build the ffmpeg argument list for the mix.
///
/// Remote inputs get reconnect options so long downloads survive the
/// occasional dropped connection.
pub fn mixdown_args(inputs: &[String], output_path: &Path, sample_rate: u32) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into()];

    for input in inputs {
        if input.starts_with("http://") || input.starts_with("https://") {
            args.extend([
                "-reconnect".into(),
                "1".into(),
                "-reconnect_streamed".into(),
                "1".into(),
                "-reconnect_delay_max".into(),
                "5".into(),
            ]);
        }
        args.extend(["-i".into(), input.clone()]);
    }

    let input_labels: String = (0..inputs.len()).map(|i| format!("[{i}:a]")).collect();
    let filter_complex = format!(
        "{input_labels}amix=inputs={}:normalize=0,\
         aformat=sample_fmts=s16:channel_layouts=stereo:sample_rates={sample_rate}[out]",
        inputs.len()
    );

    args.extend([
        "-filter_complex".into(),
        filter_complex,
        "-map".into(),
        "[out]".into(),
        "-vn".into(),
        "-c:a".into(),
        "libmp3lame".into(),
        "-b:a".into(),
        MP3_BIT_RATE.into(),
        output_path.to_string_lossy().to_string(),
    ]);

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn filter_graph_mixes_all_inputs_without_normalization() {
        let inputs = vec![
            "https://s/padded_0.webm".to_string(),
            "https://s/padded_1.webm".to_string(),
            "https://s/padded_2.webm".to_string(),
        ];
        let args = mixdown_args(&inputs, Path::new("/tmp/audio.mp3"), 48_000);
        let joined = args.join(" ");
        assert!(joined.contains("[0:a][1:a][2:a]amix=inputs=3:normalize=0"));
        assert!(joined.contains("sample_rates=48000"));
        assert!(joined.contains("libmp3lame"));
        assert!(joined.contains("-b:a 192k"));
    }

    #[test]
    fn remote_inputs_get_reconnect_options() {
        let inputs = vec!["https://s/a.webm".to_string()];
        let args = mixdown_args(&inputs, Path::new("/tmp/out.mp3"), 44_100);
        let reconnect_pos = args.iter().position(|a| a == "-reconnect").unwrap();
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        assert!(reconnect_pos < input_pos);
    }

    #[test]
    fn local_inputs_skip_reconnect_options() {
        let inputs = vec!["/tmp/a.webm".to_string()];
        let args = mixdown_args(&inputs, Path::new("/tmp/out.mp3"), 44_100);
        assert!(!args.iter().any(|a| a == "-reconnect"));
    }
}

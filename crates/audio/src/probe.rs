//! Container metadata probing via ffprobe.

use serde::Deserialize;

use rf_domain::Result;

use crate::runner::run_ffprobe;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ffprobe JSON shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize, Default)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    packets: Vec<ProbePacket>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
    /// Seconds, as a decimal string.
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    sample_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbePacket {
    #[serde(default)]
    dts_time: Option<String>,
}

fn parse_seconds(value: &Option<String>) -> Option<f64> {
    value.as_deref().and_then(|s| s.parse::<f64>().ok())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Start-time extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pick the meeting-relative start time from probed metadata.
///
/// Priority is a hard contract: the audio stream's own start_time beats the
/// container-level value, which beats the first packet's DTS. Stream
/// metadata is ~209 ms more accurate than filename timestamps, so it must
/// be tried first.
fn select_start_time(probe: &ProbeOutput, first_packet_dts: Option<f64>) -> f64 {
    let audio_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .or_else(|| probe.streams.first());

    let mut start = audio_stream
        .and_then(|s| parse_seconds(&s.start_time))
        .unwrap_or(0.0);

    if start <= 0.0 {
        if let Some(fmt) = &probe.format {
            start = parse_seconds(&fmt.start_time).unwrap_or(0.0);
        }
    }

    if start <= 0.0 {
        start = first_packet_dts.unwrap_or(0.0);
    }

    start
}

/// Read the stream start time of `input`, in seconds.
///
/// A start time of 0.0 (or anything unreadable) means the track needs no
/// padding; probe errors are logged and treated the same way.
pub async fn probe_start_time(input: &str) -> f64 {
    let meta = match run_ffprobe(&probe_meta_args(input)).await {
        Ok(out) => serde_json::from_str::<ProbeOutput>(&out).unwrap_or_default(),
        Err(e) => {
            tracing::warn!(input = %input, error = %e, "metadata probe failed; assuming 0 start time");
            return 0.0;
        }
    };

    // Only pay for the packet probe when the cheap metadata comes up empty.
    let needs_packet = select_start_time(&meta, None) <= 0.0;
    let packet_dts = if needs_packet {
        match run_ffprobe(&probe_packet_args(input)).await {
            Ok(out) => serde_json::from_str::<ProbeOutput>(&out)
                .ok()
                .and_then(|p| p.packets.first().and_then(|pk| parse_seconds(&pk.dts_time))),
            Err(_) => None,
        }
    } else {
        None
    };

    let start = select_start_time(&meta, packet_dts);
    tracing::info!(input = %input, start_time = start, "stream metadata probed");
    start
}

/// Duration of `input` in seconds, from the container format block.
pub async fn probe_duration(input: &str) -> Result<f64> {
    let out = run_ffprobe(&probe_meta_args(input)).await?;
    let probe: ProbeOutput = serde_json::from_str(&out)?;
    Ok(probe
        .format
        .and_then(|f| parse_seconds(&f.duration))
        .unwrap_or(0.0))
}

/// Sample rate of the first audio stream of `input`, if decodable.
pub async fn probe_sample_rate(input: &str) -> Option<u32> {
    let out = run_ffprobe(&probe_meta_args(input)).await.ok()?;
    let probe: ProbeOutput = serde_json::from_str(&out).ok()?;
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .and_then(|s| s.sample_rate.as_deref())
        .and_then(|s| s.parse().ok())
}

/// Milliseconds of silence to prepend for a given stream start time.
pub fn delay_ms_for_start_time(start_time_seconds: f64) -> u64 {
    if start_time_seconds <= 0.0 {
        return 0;
    }
    (start_time_seconds * 1000.0).floor() as u64
}

fn probe_meta_args(input: &str) -> Vec<String> {
    vec![
        "-v".into(),
        "error".into(),
        "-print_format".into(),
        "json".into(),
        "-show_streams".into(),
        "-show_format".into(),
        input.to_string(),
    ]
}

fn probe_packet_args(input: &str) -> Vec<String> {
    vec![
        "-v".into(),
        "error".into(),
        "-select_streams".into(),
        "a:0".into(),
        "-show_packets".into(),
        "-read_intervals".into(),
        "%+#1".into(),
        "-print_format".into(),
        "json".into(),
        input.to_string(),
    ]
}

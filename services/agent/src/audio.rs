//! Microphone capture and speaker playback.
//!
//! Captured audio is downmixed, resampled to the endpoint rate and handed
//! to the transport as base64 PCM16. Agent audio goes the other way into a
//! ring buffer drained by the output callback.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use rubato::Resampler;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::transport::AgentAudio;
use voice_native_utils::audio::{self, CONVAI_PCM16_SAMPLE_RATE};
use voice_native_utils::device;

/// Frames per microphone callback.
pub const INPUT_CHUNK_SIZE: usize = 1024;
/// Frames per speaker callback.
pub const OUTPUT_CHUNK_SIZE: usize = 1024;
/// Playback buffer length in milliseconds.
pub const OUTPUT_LATENCY_MS: usize = 1000;

/// Keeps the device streams running; audio stops when dropped.
pub struct AudioStreams {
    _input: Stream,
    _output: Stream,
}

pub fn list_devices() -> Result<()> {
    println!("Input devices:\n{}", device::describe_inputs()?);
    println!("Output devices:\n{}", device::describe_outputs()?);
    Ok(())
}

/// Starts capture into `mic_tx` and playback from `playback_rx`.
pub fn start(mic_tx: mpsc::Sender<String>, playback_rx: mpsc::Receiver<AgentAudio>) -> Result<AudioStreams> {
    let input = start_input(mic_tx)?;
    let output = start_output(playback_rx)?;
    Ok(AudioStreams {
        _input: input,
        _output: output,
    })
}

fn start_input(mic_tx: mpsc::Sender<String>) -> Result<Stream> {
    let input = device::get_or_default_input(None).context("Failed to get default audio input device")?;
    tracing::info!("Using input device: {:?}", input.name()?);

    let default_config = input
        .default_input_config()
        .context("Failed to get default input config")?;
    let input_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(INPUT_CHUNK_SIZE as FrameCount),
    };
    let channels = input_config.channels as usize;
    let input_rate = input_config.sample_rate.0 as f64;
    tracing::info!("Input stream config: {:?}", &input_config);

    let (raw_tx, mut raw_rx) = mpsc::channel::<Vec<f32>>(64);
    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        if let Err(e) = raw_tx.try_send(audio::downmix(data, channels)) {
            tracing::trace!("dropping captured audio: {}", e);
        }
    };

    let mut resampler = audio::create_resampler(input_rate, CONVAI_PCM16_SAMPLE_RATE, INPUT_CHUNK_SIZE)?;
    tokio::spawn(async move {
        let mut pending: Vec<f32> = Vec::new();
        while let Some(samples) = raw_rx.recv().await {
            pending.extend(samples);
            while pending.len() >= resampler.input_frames_next() {
                let frames = resampler.input_frames_next();
                let chunk: Vec<f32> = pending.drain(..frames).collect();
                let resampled = match resampler.process(&[chunk.as_slice()], None) {
                    Ok(resampled) => resampled,
                    Err(e) => {
                        tracing::warn!("failed to resample microphone audio: {}", e);
                        continue;
                    }
                };
                let Some(mono) = resampled.first() else {
                    continue;
                };
                match mic_tx.try_send(audio::encode(mono)) {
                    Ok(()) => {}
                    // No session is draining the microphone right now.
                    Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => return,
                }
            }
        }
    });

    let stream = input.build_input_stream(
        &input_config,
        input_data_fn,
        move |err| tracing::error!("An error occurred on input stream: {}", err),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

fn start_output(mut playback_rx: mpsc::Receiver<AgentAudio>) -> Result<Stream> {
    let output = device::get_or_default_output(None).context("Failed to get default audio output device")?;
    tracing::info!("Using output device: {:?}", output.name()?);

    let default_config = output
        .default_output_config()
        .context("Failed to get default output config")?;
    let output_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(OUTPUT_CHUNK_SIZE as FrameCount),
    };
    let channels = output_config.channels as usize;
    let output_rate = output_config.sample_rate.0 as f64;
    tracing::info!("Output stream config: {:?}", &output_config);

    let latency_frames = output_rate as usize * OUTPUT_LATENCY_MS / 1000;
    let (mut producer, mut consumer) = audio::shared_buffer(latency_frames * 4).split();

    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        for frame in data.chunks_mut(channels) {
            let sample = consumer.try_pop().unwrap_or(0.0);
            frame.fill(sample);
        }
    };

    let mut input_rate = CONVAI_PCM16_SAMPLE_RATE;
    let mut resampler = audio::create_resampler(input_rate, output_rate, 100)?;
    tokio::spawn(async move {
        while let Some(fragment) = playback_rx.recv().await {
            let rate = fragment.sample_rate as f64;
            if rate != input_rate {
                match audio::create_resampler(rate, output_rate, 100) {
                    Ok(r) => {
                        tracing::info!("agent audio rate changed to {} Hz", fragment.sample_rate);
                        resampler = r;
                        input_rate = rate;
                    }
                    Err(e) => {
                        tracing::warn!("cannot play agent audio at {} Hz: {}", fragment.sample_rate, e);
                        continue;
                    }
                }
            }
            let samples = audio::decode(&fragment.base64_pcm16);
            let chunk_size = resampler.input_frames_next();
            for chunk in audio::split_for_chunks(&samples, chunk_size) {
                match resampler.process(&[chunk.as_slice()], None) {
                    Ok(resampled) => {
                        for sample in resampled.first().into_iter().flatten() {
                            if producer.try_push(*sample).is_err() {
                                tracing::warn!("playback buffer full, dropping agent audio");
                                break;
                            }
                        }
                    }
                    Err(e) => tracing::warn!("failed to resample agent audio: {}", e),
                }
            }
        }
    });

    let stream = output.build_output_stream(
        &output_config,
        output_data_fn,
        move |err| tracing::error!("An error occurred on output stream: {}", err),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

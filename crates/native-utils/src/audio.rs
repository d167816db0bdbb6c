use base64::Engine;
use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree};

/// Sample rate of the PCM16 audio the conversation endpoint sends and expects.
pub const CONVAI_PCM16_SAMPLE_RATE: f64 = 16000.0;

/// Creates a mono resampler between two sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Averages interleaved frames down to one channel.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Splits samples into fixed-size chunks, zero-padding the last one.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Heap ring buffer shared between the decoder and the output stream.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size.max(1))
}

/// Decodes base64 little-endian PCM16 into samples in `[-1.0, 1.0]`.
///
/// Invalid base64 is logged and yields no samples; a trailing odd byte is
/// ignored.
pub fn decode(base64_fragment: &str) -> Vec<f32> {
    match base64::engine::general_purpose::STANDARD.decode(base64_fragment) {
        Ok(pcm16) => pcm16
            .chunks_exact(2)
            .map(|chunk| {
                let v = i16::from_le_bytes([chunk[0], chunk[1]]);
                (v as f32 / 32768.0).clamp(-1.0, 1.0)
            })
            .collect(),
        Err(e) => {
            tracing::error!("failed to decode audio fragment: {}", e);
            Vec::new()
        }
    }
}

/// Encodes samples as base64 little-endian PCM16.
pub fn encode(pcm32: &[f32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm32.to_binary())
}

/// Conversion of sample slices to little-endian PCM16 bytes.
pub trait ToBinary {
    fn to_binary(&self) -> Vec<u8>;
}

impl ToBinary for [f32] {
    fn to_binary(&self) -> Vec<u8> {
        self.iter()
            .flat_map(|&sample| {
                let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                v.to_le_bytes()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_stereo_frames() {
        let stereo = [0.5, -0.5, 1.0, 0.0];
        assert_eq!(downmix(&stereo, 2), vec![0.0, 0.5]);
        assert_eq!(downmix(&stereo, 1), stereo.to_vec());
    }

    #[test]
    fn encoded_pcm16_decodes_to_same_levels() {
        let samples = [0.0, 0.5, -0.5, 1.0];
        let decoded = decode(&encode(&samples));
        assert_eq!(decoded.len(), samples.len());
        for (got, want) in decoded.iter().zip(samples) {
            assert!((got - want).abs() < 1e-3, "{got} vs {want}");
        }
    }

    #[test]
    fn invalid_base64_yields_silence() {
        assert!(decode("not base64!").is_empty());
    }

    #[test]
    fn split_pads_final_chunk() {
        let chunks = split_for_chunks(&[1.0, 2.0, 3.0], 2);
        assert_eq!(chunks, vec![vec![1.0, 2.0], vec![3.0, 0.0]]);
    }

    #[test]
    fn resampler_halves_frame_count() {
        use rubato::Resampler;

        let mut resampler = create_resampler(32000.0, CONVAI_PCM16_SAMPLE_RATE, 1024).unwrap();
        let input = vec![0.0f32; resampler.input_frames_next()];
        let output = resampler.process(&[input.as_slice()], None).unwrap();
        assert_eq!(output.len(), 1);
        let frames = output[0].len() as i64;
        assert!((frames - 512).abs() <= 16, "got {frames} frames");
    }
}

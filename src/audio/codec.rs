//! # PCM Codec
//!
//! Pure conversions between the in-memory sample format (f32 in [-1, 1]) and
//! the wire format (16-bit little-endian PCM, base64 encoded).
//!
//! ## Scaling:
//! Outbound samples are scaled asymmetrically: negative values by 32768,
//! non-negative values by 32767, then truncated toward zero. Inbound samples
//! are always divided by 32768. The backend relies on exactly this mapping so
//! it is kept as is, even though it is not perfectly symmetric.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::error::VoiceResult;

/// Encode a block of captured samples into an `audio_data` frame.
pub fn encode_outbound(samples: &[f32]) -> String {
    STANDARD.encode(pcm16_to_bytes(&float_to_pcm16(samples)))
}

/// Decode an `audio_delta` frame into samples ready for playback.
///
/// A trailing odd byte is ignored. Invalid base64 is a protocol error.
pub fn decode_inbound(frame: &str) -> VoiceResult<Vec<f32>> {
    let bytes = STANDARD.decode(frame.trim())?;
    Ok(pcm16_to_float(&bytes_to_pcm16(&bytes)))
}

/// Clamp to [-1, 1] and quantize to 16-bit integers.
///
/// NaN maps to 0 (Rust float-to-int casts saturate and send NaN to zero).
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let clamped = sample.clamp(-1.0, 1.0);
            if clamped < 0.0 {
                (clamped * 32768.0) as i16
            } else {
                (clamped * 32767.0) as i16
            }
        })
        .collect()
}

/// Scales from 16-bit integer range [-32768, 32767] to float range [-1.0, 1.0).
pub fn pcm16_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut bytes);
    bytes
}

pub fn bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceError;

    #[test]
    fn test_asymmetric_scaling() {
        let pcm = float_to_pcm16(&[-1.0, 1.0, 0.0, -0.5, 0.5]);
        assert_eq!(pcm, vec![-32768, 32767, 0, -16384, 16383]);
    }

    #[test]
    fn test_out_of_range_samples_are_clamped() {
        let pcm = float_to_pcm16(&[-3.0, 2.5, f32::NAN]);
        assert_eq!(pcm, vec![-32768, 32767, 0]);
    }

    #[test]
    fn test_little_endian_layout() {
        let bytes = pcm16_to_bytes(&[1, -2, 0x1234]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
        assert_eq!(bytes_to_pcm16(&bytes), vec![1, -2, 0x1234]);
    }

    #[test]
    fn test_trailing_odd_byte_is_ignored() {
        assert_eq!(bytes_to_pcm16(&[0x01, 0x00, 0x7F]), vec![1]);
    }

    #[test]
    fn test_known_wire_frame() {
        assert_eq!(encode_outbound(&[0.0, -1.0, 1.0]), "AAAAgP9/");
        let decoded = decode_inbound("AAAAgP9/").unwrap();
        assert_eq!(decoded, vec![0.0, -1.0, 32767.0 / 32768.0]);
    }

    #[test]
    fn test_round_trip_within_quantization() {
        let samples: Vec<f32> = (-100..=100).map(|i| i as f32 / 100.0).collect();
        let decoded = decode_inbound(&encode_outbound(&samples)).unwrap();

        assert_eq!(decoded.len(), samples.len());
        for (original, restored) in samples.iter().zip(decoded.iter()) {
            // Truncation plus the 32767/32768 mismatch on the positive side.
            let bound = if *original < 0.0 { 1.0 / 32768.0 } else { 2.0 / 32768.0 };
            assert!(
                (original - restored).abs() <= bound,
                "{} came back as {}",
                original,
                restored
            );
        }
    }

    #[test]
    fn test_repeated_round_trip_is_stable_for_non_positive_samples() {
        let samples: Vec<f32> = (0..=64).map(|i| -(i as f32) / 64.0).collect();
        let once = decode_inbound(&encode_outbound(&samples)).unwrap();
        let twice = decode_inbound(&encode_outbound(&once)).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_invalid_frame_is_protocol_error() {
        let err = decode_inbound("@@not-base64@@").unwrap_err();
        assert!(matches!(err, VoiceError::Protocol(_)));
    }

    #[test]
    fn test_empty_frame_decodes_to_nothing() {
        assert!(decode_inbound("").unwrap().is_empty());
        assert_eq!(encode_outbound(&[]), "");
    }
}

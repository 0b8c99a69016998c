//! # Audio Module
//!
//! Everything between the sound card and the duplex channel.
//!
//! ## Key Components:
//! - **Codec**: f32 ⇄ 16-bit PCM ⇄ base64 text frames
//! - **Capture Pipeline**: frames microphone samples into fixed blocks, applies
//!   the mute gate and encodes what survives
//! - **Output Queue**: plays decoded agent speech one chunk at a time, in order
//! - **Devices**: where samples actually come from and go to (WAV files, the
//!   system sound card with the `cpal` feature)
//!
//! ## Audio Format:
//! - **Sample Rate**: 24kHz in both directions
//! - **Bit Depth**: 16-bit PCM on the wire, f32 in memory
//! - **Channels**: Mono
//! - **Encoding**: Little-endian signed integers, base64 text

pub mod capture; // Microphone framing and mute gating
pub mod codec; // PCM conversions and wire encoding
pub mod device; // Audio sources and sinks
pub mod playback; // Sequential agent speech playback

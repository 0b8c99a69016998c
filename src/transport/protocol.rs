//! Voice event vocabulary.
//!
//! Outbound messages are what the client emits; inbound events are what the
//! backend emits. Both travel as `(event name, optional JSON payload)` pairs.
//! Inbound payloads use camelCase keys.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{VoiceError, VoiceResult};
use crate::transcript::Role;

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    StartConversation { language: String },
    AudioData { audio: String },
    Interrupt,
    UpdateLanguage { language: String },
    EndConversation,
}

impl OutboundMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundMessage::StartConversation { .. } => "start_conversation",
            OutboundMessage::AudioData { .. } => "audio_data",
            OutboundMessage::Interrupt => "interrupt",
            OutboundMessage::UpdateLanguage { .. } => "update_language",
            OutboundMessage::EndConversation => "end_conversation",
        }
    }

    pub fn payload(&self) -> Option<Value> {
        match self {
            OutboundMessage::StartConversation { language }
            | OutboundMessage::UpdateLanguage { language } => Some(json!({ "language": language })),
            OutboundMessage::AudioData { audio } => Some(json!({ "audio": audio })),
            OutboundMessage::Interrupt | OutboundMessage::EndConversation => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ConversationStarted {
        conversation_id: String,
        agent_name: String,
        language: String,
    },
    ConversationEnded,
    AudioDelta { audio: String },
    AudioDone,
    TranscriptDelta { role: Role, delta: String },
    TranscriptDone { role: Role, transcript: String },
    UserTranscript { transcript: String },
    SpeechStarted,
    SpeechStopped,
    LanguageUpdated { language: String, agent_name: String },
    Error { message: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationStartedPayload {
    #[serde(default)]
    conversation_id: String,
    #[serde(default)]
    agent_name: String,
    #[serde(default)]
    language: String,
}

#[derive(Deserialize)]
struct AudioPayload {
    audio: String,
}

#[derive(Deserialize)]
struct TranscriptDeltaPayload {
    role: Role,
    delta: String,
}

#[derive(Deserialize)]
struct TranscriptPayload {
    #[serde(default)]
    role: Option<Role>,
    transcript: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LanguageUpdatedPayload {
    language: String,
    #[serde(default)]
    agent_name: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: String,
}

impl InboundEvent {
    /// Build a typed event from its wire name and payload.
    ///
    /// Unknown names and payloads of the wrong shape are protocol errors.
    pub fn from_wire(name: &str, payload: Option<Value>) -> VoiceResult<Self> {
        let event = match name {
            "conversation_started" => {
                let p: ConversationStartedPayload = parse(name, payload)?;
                InboundEvent::ConversationStarted {
                    conversation_id: p.conversation_id,
                    agent_name: p.agent_name,
                    language: p.language,
                }
            }
            "conversation_ended" => InboundEvent::ConversationEnded,
            "audio_delta" => {
                let p: AudioPayload = parse(name, payload)?;
                InboundEvent::AudioDelta { audio: p.audio }
            }
            "audio_done" => InboundEvent::AudioDone,
            "transcript_delta" => {
                let p: TranscriptDeltaPayload = parse(name, payload)?;
                InboundEvent::TranscriptDelta {
                    role: p.role,
                    delta: p.delta,
                }
            }
            "transcript_done" => {
                let p: TranscriptPayload = parse(name, payload)?;
                InboundEvent::TranscriptDone {
                    role: p.role.unwrap_or(Role::Assistant),
                    transcript: p.transcript,
                }
            }
            "user_transcript" => {
                let p: TranscriptPayload = parse(name, payload)?;
                InboundEvent::UserTranscript {
                    transcript: p.transcript,
                }
            }
            "speech_started" => InboundEvent::SpeechStarted,
            "speech_stopped" => InboundEvent::SpeechStopped,
            "language_updated" => {
                let p: LanguageUpdatedPayload = parse(name, payload)?;
                InboundEvent::LanguageUpdated {
                    language: p.language,
                    agent_name: p.agent_name,
                }
            }
            "error" => {
                let p: ErrorPayload = parse(name, payload)?;
                InboundEvent::Error { message: p.message }
            }
            other => return Err(VoiceError::Protocol(format!("unknown event '{}'", other))),
        };
        Ok(event)
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::ConversationStarted { .. } => "conversation_started",
            InboundEvent::ConversationEnded => "conversation_ended",
            InboundEvent::AudioDelta { .. } => "audio_delta",
            InboundEvent::AudioDone => "audio_done",
            InboundEvent::TranscriptDelta { .. } => "transcript_delta",
            InboundEvent::TranscriptDone { .. } => "transcript_done",
            InboundEvent::UserTranscript { .. } => "user_transcript",
            InboundEvent::SpeechStarted => "speech_started",
            InboundEvent::SpeechStopped => "speech_stopped",
            InboundEvent::LanguageUpdated { .. } => "language_updated",
            InboundEvent::Error { .. } => "error",
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(name: &str, payload: Option<Value>) -> VoiceResult<T> {
    let payload = payload.ok_or_else(|| VoiceError::Protocol(format!("'{}' without payload", name)))?;
    serde_json::from_value(payload)
        .map_err(|e| VoiceError::Protocol(format!("bad '{}' payload: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_payloads() {
        let start = OutboundMessage::StartConversation {
            language: "en".to_string(),
        };
        assert_eq!(start.event_name(), "start_conversation");
        assert_eq!(start.payload(), Some(json!({"language": "en"})));

        assert_eq!(OutboundMessage::Interrupt.payload(), None);
        assert_eq!(OutboundMessage::EndConversation.event_name(), "end_conversation");
    }

    #[test]
    fn test_conversation_started_uses_camel_case() {
        let event = InboundEvent::from_wire(
            "conversation_started",
            Some(json!({"conversationId": "c-1", "agentName": "Ada", "language": "de"})),
        )
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::ConversationStarted {
                conversation_id: "c-1".to_string(),
                agent_name: "Ada".to_string(),
                language: "de".to_string(),
            }
        );
    }

    #[test]
    fn test_transcript_events() {
        let delta = InboundEvent::from_wire(
            "transcript_delta",
            Some(json!({"role": "assistant", "delta": "Hel"})),
        )
        .unwrap();
        assert_eq!(
            delta,
            InboundEvent::TranscriptDelta {
                role: Role::Assistant,
                delta: "Hel".to_string()
            }
        );

        let user = InboundEvent::from_wire(
            "user_transcript",
            Some(json!({"role": "user", "transcript": "hi there"})),
        )
        .unwrap();
        assert_eq!(user.name(), "user_transcript");
    }

    #[test]
    fn test_payloadless_events() {
        for name in ["conversation_ended", "audio_done", "speech_started", "speech_stopped"] {
            let event = InboundEvent::from_wire(name, None).unwrap();
            assert_eq!(event.name(), name);
        }
    }

    #[test]
    fn test_unknown_and_malformed_events_are_rejected() {
        assert!(matches!(
            InboundEvent::from_wire("dance", None),
            Err(VoiceError::Protocol(_))
        ));
        assert!(matches!(
            InboundEvent::from_wire("audio_delta", None),
            Err(VoiceError::Protocol(_))
        ));
        assert!(matches!(
            InboundEvent::from_wire("transcript_delta", Some(json!({"role": "robot", "delta": "x"}))),
            Err(VoiceError::Protocol(_))
        ));
    }
}

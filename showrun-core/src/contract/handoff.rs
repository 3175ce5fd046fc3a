//! Typed handoff schemas
//!
//! The structured outputs each stage hands to its successor. The scheduler
//! stores these verbatim as opaque JSON; the types here exist for handlers
//! and collaborators that want strong typing. The dispatch key is the stage
//! name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::StageName;

/// RESEARCH → SCRIPT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutput {
    pub topic: String,
    /// 3 to 10 verified facts.
    pub facts: Vec<String>,
    pub sources: Vec<String>,
    /// 2 to 5 candidate hooks.
    pub hooks: Vec<String>,
    pub target_audience: String,
    /// Seconds, between 15 and 180.
    pub estimated_duration: u32,
}

/// One section of the script body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSection {
    pub heading: String,
    pub content: String,
    pub visual_cue: String,
    pub duration_s: f64,
}

/// SCRIPT → VOICE
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptOutput {
    pub hook: String,
    pub body: Vec<ScriptSection>,
    pub cta: String,
    pub full_script: String,
    pub estimated_duration: u32,
    pub speaker_notes: Vec<String>,
}

/// A spoken-word timing mark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechMark {
    pub time_s: f64,
    pub text: String,
}

/// VOICE → EDITOR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceOutput {
    pub audio_url: String,
    pub duration_s: f64,
    pub transcript: String,
    pub timestamps: Vec<SpeechMark>,
}

/// MUSIC → EDITOR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicOutput {
    pub audio_url: String,
    pub duration_s: f64,
    pub genre: String,
    pub mood: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualClip {
    pub url: String,
    pub start_time: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualOverlay {
    pub content: String,
    pub start_time: f64,
    pub duration: f64,
    pub style: String,
}

/// VISUAL → EDITOR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualOutput {
    pub clips: Vec<VisualClip>,
    pub overlays: Vec<VisualOverlay>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: String,
}

/// EDITOR → PUBLISH
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorOutput {
    pub video_url: String,
    pub thumbnail_url: String,
    pub duration_s: f64,
    pub format: VideoFormat,
    pub render_time_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformPost {
    pub platform: String,
    pub url: String,
    pub post_id: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// PUBLISH → terminal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOutput {
    pub platforms: Vec<PlatformPost>,
    pub published_at: DateTime<Utc>,
}

/// A stage output, tagged with the stage that produced it.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Research(ResearchOutput),
    Script(ScriptOutput),
    Voice(VoiceOutput),
    Music(MusicOutput),
    Visual(VisualOutput),
    Editor(EditorOutput),
    Publish(PublishOutput),
}

impl StageOutput {
    /// Decodes a verbatim stored payload into the typed output for `stage`.
    pub fn parse(stage: StageName, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match stage {
            StageName::Research => StageOutput::Research(serde_json::from_value(value)?),
            StageName::Script => StageOutput::Script(serde_json::from_value(value)?),
            StageName::Voice => StageOutput::Voice(serde_json::from_value(value)?),
            StageName::Music => StageOutput::Music(serde_json::from_value(value)?),
            StageName::Visual => StageOutput::Visual(serde_json::from_value(value)?),
            StageName::Editor => StageOutput::Editor(serde_json::from_value(value)?),
            StageName::Publish => StageOutput::Publish(serde_json::from_value(value)?),
        })
    }

    /// The stage this output belongs to.
    pub fn stage(&self) -> StageName {
        match self {
            StageOutput::Research(_) => StageName::Research,
            StageOutput::Script(_) => StageName::Script,
            StageOutput::Voice(_) => StageName::Voice,
            StageOutput::Music(_) => StageName::Music,
            StageOutput::Visual(_) => StageName::Visual,
            StageOutput::Editor(_) => StageName::Editor,
            StageOutput::Publish(_) => StageName::Publish,
        }
    }

    /// Re-encodes the typed output as the opaque payload the store persists.
    pub fn to_value(&self) -> serde_json::Value {
        let result = match self {
            StageOutput::Research(o) => serde_json::to_value(o),
            StageOutput::Script(o) => serde_json::to_value(o),
            StageOutput::Voice(o) => serde_json::to_value(o),
            StageOutput::Music(o) => serde_json::to_value(o),
            StageOutput::Visual(o) => serde_json::to_value(o),
            StageOutput::Editor(o) => serde_json::to_value(o),
            StageOutput::Publish(o) => serde_json::to_value(o),
        };
        result.expect("handoff types serialize without error")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_dispatches_on_stage_name() {
        let payload = json!({
            "topic": "Why cats purr",
            "facts": ["cats purr at 25-150 Hz", "purring aids healing", "kittens purr while nursing"],
            "sources": ["https://example.org/purring"],
            "hooks": ["Your cat is medicating itself", "The sound that heals bones"],
            "target_audience": "pet owners",
            "estimated_duration": 60
        });

        let output = StageOutput::parse(StageName::Research, payload).unwrap();
        assert_eq!(output.stage(), StageName::Research);
        match output {
            StageOutput::Research(research) => {
                assert_eq!(research.facts.len(), 3);
                assert_eq!(research.estimated_duration, 60);
            }
            other => panic!("expected research output, got {:?}", other.stage()),
        }
    }

    #[test]
    fn test_parse_rejects_mismatched_payload() {
        // A music payload does not decode as an editor handoff.
        let payload = json!({
            "audio_url": "s3://bucket/track.mp3",
            "duration_s": 62.5,
            "genre": "lo-fi",
            "mood": "calm"
        });
        assert!(StageOutput::parse(StageName::Editor, payload).is_err());
    }
}

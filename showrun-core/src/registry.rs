//! Stage registry
//!
//! The fixed production order and the attribution weight of each stage.
//! Both are shared by the scheduler and the attribution engine and must not
//! change while any pipeline is in flight; changing them is a data migration.

use serde::{Deserialize, Serialize};

/// The seven production stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StageName {
    Research,
    Script,
    Voice,
    Music,
    Visual,
    Editor,
    Publish,
}

/// Execution order. `STAGE_ORDER[0]` is the intake stage, the last entry is
/// the terminal stage whose completion completes the pipeline.
pub const STAGE_ORDER: [StageName; 7] = [
    StageName::Research,
    StageName::Script,
    StageName::Voice,
    StageName::Music,
    StageName::Visual,
    StageName::Editor,
    StageName::Publish,
];

impl StageName {
    /// All stages in execution order.
    pub fn all() -> &'static [StageName] {
        &STAGE_ORDER
    }

    /// The first stage of every pipeline.
    pub fn first() -> StageName {
        STAGE_ORDER[0]
    }

    /// The terminal stage.
    pub fn last() -> StageName {
        STAGE_ORDER[STAGE_ORDER.len() - 1]
    }

    /// Zero-based position in the execution order.
    pub fn order_index(self) -> usize {
        STAGE_ORDER
            .iter()
            .position(|s| *s == self)
            .expect("stage is in STAGE_ORDER")
    }

    /// Attribution weight in whole percent. Weights sum to exactly 100.
    pub fn weight(self) -> u32 {
        match self {
            StageName::Research => 10,
            StageName::Script => 25,
            StageName::Voice => 20,
            StageName::Music => 10,
            StageName::Visual => 15,
            StageName::Editor => 15,
            StageName::Publish => 5,
        }
    }

    /// The stage that follows this one, or `None` for the terminal stage.
    pub fn next(self) -> Option<StageName> {
        STAGE_ORDER.get(self.order_index() + 1).copied()
    }

    /// The stage that precedes this one, or `None` for the first stage.
    pub fn predecessor(self) -> Option<StageName> {
        let idx = self.order_index();
        if idx == 0 {
            None
        } else {
            Some(STAGE_ORDER[idx - 1])
        }
    }

    /// The exact wire token for this stage.
    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Research => "RESEARCH",
            StageName::Script => "SCRIPT",
            StageName::Voice => "VOICE",
            StageName::Music => "MUSIC",
            StageName::Visual => "VISUAL",
            StageName::Editor => "EDITOR",
            StageName::Publish => "PUBLISH",
        }
    }

    /// Parses a wire token back into a stage name.
    pub fn parse(s: &str) -> Option<StageName> {
        match s {
            "RESEARCH" => Some(StageName::Research),
            "SCRIPT" => Some(StageName::Script),
            "VOICE" => Some(StageName::Voice),
            "MUSIC" => Some(StageName::Music),
            "VISUAL" => Some(StageName::Visual),
            "EDITOR" => Some(StageName::Editor),
            "PUBLISH" => Some(StageName::Publish),
            _ => None,
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageName::parse(s).ok_or_else(|| format!("unknown stage name: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_100() {
        let sum: u32 = STAGE_ORDER.iter().map(|s| s.weight()).sum();
        assert_eq!(sum, 100);
    }

    #[test]
    fn test_order_chain() {
        assert_eq!(StageName::first(), StageName::Research);
        assert_eq!(StageName::last(), StageName::Publish);
        assert_eq!(StageName::Research.next(), Some(StageName::Script));
        assert_eq!(StageName::Publish.next(), None);
        assert_eq!(StageName::Research.predecessor(), None);
        assert_eq!(StageName::Publish.predecessor(), Some(StageName::Editor));

        // Walking next() from the first stage visits every stage once.
        let mut walked = vec![StageName::first()];
        while let Some(next) = walked.last().unwrap().next() {
            walked.push(next);
        }
        assert_eq!(walked, STAGE_ORDER);
    }

    #[test]
    fn test_wire_tokens_round_trip() {
        for stage in StageName::all() {
            assert_eq!(StageName::parse(stage.as_str()), Some(*stage));
        }
        assert_eq!(StageName::parse("MIXDOWN"), None);
    }

    #[test]
    fn test_serde_uses_wire_tokens() {
        let json = serde_json::to_string(&StageName::Research).unwrap();
        assert_eq!(json, "\"RESEARCH\"");
        let back: StageName = serde_json::from_str("\"EDITOR\"").unwrap();
        assert_eq!(back, StageName::Editor);
    }
}

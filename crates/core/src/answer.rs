//! Answer, citation and confidence types
//!
//! `AnswerResult` is the unit returned to callers and the unit stored inside
//! assistant conversation turns. Its JSON form is the persisted format:
//!
//! ```json
//! {
//!   "answer": "...",
//!   "citations": [{"document_name": "...", "document_number": 1, "page_numbers": [12]}],
//!   "confidence": {"confidence_score": 85, "reasoning": "..."}
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Literal answer the synthesizer emits when the passages do not support an answer
pub const INSUFFICIENT_INFORMATION: &str = "Insufficient information";

/// Deepest fallback when no usable answer could be produced
pub const APOLOGY: &str =
    "I'm sorry, I wasn't able to put together an answer to that question. Please try rephrasing it.";

/// Reference from an answer back to a source document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub document_name: String,
    /// Ordinal of the document within this turn's passages, 1-based
    pub document_number: u32,
    #[serde(default)]
    pub page_numbers: Vec<u32>,
}

impl Citation {
    pub fn new(document_name: impl Into<String>, document_number: u32, page_numbers: Vec<u32>) -> Self {
        Self {
            document_name: document_name.into(),
            document_number,
            page_numbers,
        }
    }
}

/// Self-reported support level of an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    /// 0..=100, or `NOT_EVALUATED`
    pub confidence_score: i32,
    pub reasoning: String,
}

impl ConfidenceScore {
    pub const NOT_EVALUATED: i32 = -1;

    /// Evaluated score, clamped into 0..=100
    pub fn new(score: i32, reasoning: impl Into<String>) -> Self {
        Self {
            confidence_score: score.clamp(0, 100),
            reasoning: reasoning.into(),
        }
    }

    /// Sentinel score meaning "skip refinement"
    pub fn not_evaluated(reasoning: impl Into<String>) -> Self {
        Self {
            confidence_score: Self::NOT_EVALUATED,
            reasoning: reasoning.into(),
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.confidence_score >= 0
    }

    /// True only for evaluated scores strictly below `threshold`
    pub fn is_low(&self, threshold: i32) -> bool {
        (0..threshold).contains(&self.confidence_score)
    }
}

/// Result of one answered turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceScore>,
    /// Extra synthesis passes made by the refinement loop
    #[serde(default, skip_serializing_if = "is_zero")]
    pub regeneration_attempts: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl AnswerResult {
    pub fn new(answer: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            answer: answer.into(),
            citations,
            confidence: None,
            regeneration_attempts: 0,
        }
    }

    /// Fixed user-facing apology with no citations
    pub fn apology() -> Self {
        Self::new(APOLOGY, Vec::new())
    }

    pub fn insufficient_information() -> Self {
        Self::new(INSUFFICIENT_INFORMATION, Vec::new())
    }

    pub fn with_confidence(mut self, confidence: ConfidenceScore) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Whether the answer is the "insufficient information" sentinel.
    ///
    /// Casing, separators and surrounding punctuation are ignored; any other
    /// text makes it a real answer.
    pub fn is_insufficient_information(&self) -> bool {
        let normalized = self
            .answer
            .trim()
            .trim_matches(|c: char| c == '.' || c == '"' || c == '\'' || c == '!')
            .to_lowercase()
            .replace(['_', '-'], " ");
        normalized.trim() == INSUFFICIENT_INFORMATION.to_lowercase()
    }

    pub fn is_apology(&self) -> bool {
        self.answer == APOLOGY && self.citations.is_empty()
    }

    /// Confidence score, or the sentinel when not evaluated yet
    pub fn confidence_score(&self) -> i32 {
        self.confidence
            .as_ref()
            .map(|c| c.confidence_score)
            .unwrap_or(ConfidenceScore::NOT_EVALUATED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_format() {
        let answer = AnswerResult::new(
            "Bharata was the son of Dushyanta.",
            vec![Citation::new("Adi Parva", 1, vec![74, 75])],
        )
        .with_confidence(ConfidenceScore::new(92, "Directly stated in passage 1"));

        let json = serde_json::to_value(&answer).unwrap();
        assert_eq!(json["answer"], "Bharata was the son of Dushyanta.");
        assert_eq!(json["citations"][0]["document_number"], 1);
        assert_eq!(json["citations"][0]["page_numbers"][1], 75);
        assert_eq!(json["confidence"]["confidence_score"], 92);
        assert!(json.get("regeneration_attempts").is_none());

        let back: AnswerResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, answer);
    }

    #[test]
    fn test_confidence_optional() {
        let parsed: AnswerResult =
            serde_json::from_str(r#"{"answer": "x", "citations": []}"#).unwrap();
        assert!(parsed.confidence.is_none());
        assert_eq!(parsed.confidence_score(), -1);
    }

    #[test]
    fn test_insufficient_information_detection() {
        assert!(AnswerResult::insufficient_information().is_insufficient_information());
        assert!(AnswerResult::new("INSUFFICIENT_INFORMATION", vec![]).is_insufficient_information());
        assert!(AnswerResult::new("Insufficient information.", vec![]).is_insufficient_information());
        assert!(!AnswerResult::new("Paris is the capital.", vec![]).is_insufficient_information());
        assert!(!AnswerResult::new(
            "Insufficient information about his birth; however, the Adi Parva names his parents.",
            vec![]
        )
        .is_insufficient_information());
    }

    #[test]
    fn test_score_bounds() {
        assert_eq!(ConfidenceScore::new(140, "").confidence_score, 100);
        assert_eq!(ConfidenceScore::new(-20, "").confidence_score, 0);

        let sentinel = ConfidenceScore::not_evaluated("not enough information");
        assert!(!sentinel.is_evaluated());
        assert!(!sentinel.is_low(75));
        assert!(ConfidenceScore::new(74, "").is_low(75));
        assert!(!ConfidenceScore::new(75, "").is_low(75));
    }

    #[test]
    fn test_apology() {
        let apology = AnswerResult::apology();
        assert!(apology.is_apology());
        assert!(apology.citations.is_empty());
    }
}

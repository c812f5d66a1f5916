use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// How a question is answered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerMode {
    /// Plain LLM call, no retrieval.
    #[default]
    #[serde(rename = "None")]
    Direct,
    /// Retrieval QA without history.
    #[serde(rename = "qa_chain")]
    QaChain,
    /// Retrieval QA with the session transcript as memory.
    #[serde(rename = "chat_qa_chain")]
    ChatQaChain,
}

impl AnswerMode {
    pub fn all() -> [AnswerMode; 3] {
        [
            AnswerMode::Direct,
            AnswerMode::QaChain,
            AnswerMode::ChatQaChain,
        ]
    }

    /// Missing or blank values select the plain mode.
    pub fn parse(value: Option<&str>) -> Result<Self, ApiError> {
        match value.map(str::trim).unwrap_or("") {
            "" | "None" | "none" => Ok(AnswerMode::Direct),
            "qa_chain" => Ok(AnswerMode::QaChain),
            "chat_qa_chain" => Ok(AnswerMode::ChatQaChain),
            other => Err(ApiError::BadRequest(format!(
                "Unknown answer mode '{}' (expected None, qa_chain or chat_qa_chain)",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnswerMode::Direct => "None",
            AnswerMode::QaChain => "qa_chain",
            AnswerMode::ChatQaChain => "chat_qa_chain",
        }
    }

    pub fn caption(self) -> &'static str {
        match self {
            AnswerMode::Direct => "不使用检索问答的普通模式",
            AnswerMode::QaChain => "不带历史记录的检索问答模式",
            AnswerMode::ChatQaChain => "带历史记录的检索问答模式",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_radio_values() {
        assert_eq!(AnswerMode::parse(None).unwrap(), AnswerMode::Direct);
        assert_eq!(AnswerMode::parse(Some("None")).unwrap(), AnswerMode::Direct);
        assert_eq!(AnswerMode::parse(Some(" qa_chain ")).unwrap(), AnswerMode::QaChain);
        assert_eq!(
            AnswerMode::parse(Some("chat_qa_chain")).unwrap(),
            AnswerMode::ChatQaChain
        );
        assert!(matches!(
            AnswerMode::parse(Some("agent")),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn serde_names_match_as_str() {
        for mode in AnswerMode::all() {
            let encoded = serde_json::to_value(mode).unwrap();
            assert_eq!(encoded, serde_json::Value::String(mode.as_str().to_string()));
            assert_eq!(AnswerMode::parse(Some(mode.as_str())).unwrap(), mode);
        }
    }
}

use serde::Deserialize;

/// Frame sent by the browser. `type` is `chat` or `set_session`.
#[derive(Debug, Deserialize, Default)]
pub struct WsIncomingMessage {
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    pub message: Option<String>,
    pub mode: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_frame() {
        let frame: WsIncomingMessage = serde_json::from_str(
            r#"{"type":"chat","message":"你好","mode":"qa_chain","sessionId":"abc"}"#,
        )
        .unwrap();
        assert_eq!(frame.msg_type.as_deref(), Some("chat"));
        assert_eq!(frame.mode.as_deref(), Some("qa_chain"));
        assert_eq!(frame.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn missing_fields_default_to_none() {
        let frame: WsIncomingMessage = serde_json::from_str(r#"{"type":"set_session"}"#).unwrap();
        assert!(frame.message.is_none());
        assert!(frame.session_id.is_none());
    }
}

use polyllm_provider::{ProviderResponse, ResponseContent, StreamEvent};

/// Replay a completed response as a normalized event sequence.
///
/// Used by providers whose endpoint (or configuration) cannot stream: the
/// single-shot response becomes `Start`, one delta carrying the full
/// text, one `ToolCall` per call in emission order, and `Finish` with the
/// call's usage. Consumers cannot distinguish this from a live stream by
/// event types.
pub fn simulated_events(response: &ProviderResponse) -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::Start];
    let text = response.text();
    if !text.is_empty() {
        events.push(StreamEvent::text_delta(text));
    }
    for content in &response.content {
        if let ResponseContent::ToolCall(call) = content {
            events.push(StreamEvent::ToolCall(call.clone()));
        }
    }
    events.push(StreamEvent::finish(Some(response.usage)));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyllm_provider::{ToolCall, Usage};

    #[test]
    fn test_replay_order() {
        let response = ProviderResponse {
            content: vec![
                ResponseContent::Text("All done.".to_string()),
                ResponseContent::ToolCall(ToolCall::new("t1", "lookup", "{}")),
            ],
            usage: Usage::new(5, 7),
            raw: serde_json::json!({}),
        };

        let events = simulated_events(&response);
        assert!(matches!(events[0], StreamEvent::Start));
        assert_eq!(events[1].delta(), Some("All done."));
        assert!(matches!(events[2], StreamEvent::ToolCall(_)));
        match &events[3] {
            StreamEvent::Finish { usage } => assert_eq!(usage.unwrap().total_tokens, 12),
            other => panic!("expected finish, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_text_emits_no_delta() {
        let response = ProviderResponse {
            content: vec![],
            usage: Usage::new(1, 0),
            raw: serde_json::json!({}),
        };
        let events = simulated_events(&response);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::Start));
        assert!(events[1].is_terminal());
    }
}

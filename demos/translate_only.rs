//! Demonstrate using the translation layer without a server.
//!
//! Usage:
//!   `cargo run --example translate_only`

use cursor_bridge::client::parse_event;
use cursor_bridge::translate::anthropic_types::{MessagesResponse, ResponseContentBlock, Usage};
use cursor_bridge::translate::openai_types::ChatCompletionRequest;
use cursor_bridge::translate::request::openai_to_anthropic;
use cursor_bridge::translate::response::anthropic_to_openai;
use cursor_bridge::translate::streaming::StreamTranslator;
use std::collections::HashMap;

fn main() {
    // A Chat Completions request as an editor would send it
    let openai_req: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
        "model": "gpt-4o",
        "messages": [
            {"role": "system", "content": "You are a geography expert. Be concise."},
            {"role": "user", "content": "What is the capital of France?"},
            {"role": "assistant", "content": null, "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "lookup_capital", "arguments": "{\"country\":\"France\"}"}
            }]},
            {"role": "tool", "tool_call_id": "call_1", "content": "Paris"},
            {"role": "user", "content": "And Germany?"}
        ],
        "tools": [{
            "type": "function",
            "function": {
                "name": "lookup_capital",
                "description": "Look up a country's capital",
                "parameters": {"type": "object", "properties": {"country": {"type": "string"}}}
            }
        }],
        "temperature": 0.7
    }))
    .expect("valid request");

    let aliases = HashMap::from([("gpt-4o".to_string(), "claude-sonnet-4-5-20250929".to_string())]);
    let anthropic_req = openai_to_anthropic(&openai_req, &aliases, "claude-sonnet-4-5-20250929");

    println!("=== Translated Request (Anthropic format) ===");
    println!("{}", serde_json::to_string_pretty(&anthropic_req).unwrap_or_default());

    // A non-streaming Messages response
    let anthropic_resp = MessagesResponse {
        id: "msg_demo".to_string(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content: vec![
            ResponseContentBlock::Text {
                text: "Let me check.".to_string(),
            },
            ResponseContentBlock::ToolUse {
                id: "toolu_demo".to_string(),
                name: "lookup_capital".to_string(),
                input: serde_json::json!({"country": "Germany"}),
            },
        ],
        model: "claude-sonnet-4-5-20250929".to_string(),
        stop_reason: Some("tool_use".to_string()),
        stop_sequence: None,
        usage: Usage {
            input_tokens: 42,
            output_tokens: 17,
        },
    };

    let openai_resp = anthropic_to_openai(&anthropic_resp, chrono::Utc::now().timestamp());

    println!("\n=== Translated Response (OpenAI format) ===");
    println!("{}", serde_json::to_string_pretty(&openai_resp).unwrap_or_default());

    // Streaming: raw SSE data payloads as the Messages API sends them
    let payloads = [
        r#"{"type":"message_start","message":{"id":"msg_stream","type":"message","role":"assistant","content":[],"model":"claude-sonnet-4-5-20250929","usage":{"input_tokens":42,"output_tokens":0}}}"#,
        r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Berlin"}}"#,
        r#"{"type":"content_block_stop","index":0}"#,
        r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":1}}"#,
        r#"{"type":"message_stop"}"#,
    ];

    println!("\n=== Streaming Translation ===");
    let mut translator = StreamTranslator::new();
    for payload in payloads {
        match parse_event(payload) {
            Ok(event) => {
                if let Some(chunk) = translator.process_event(&event) {
                    println!("data: {}", serde_json::to_string(&chunk).unwrap_or_default());
                }
            }
            Err(e) => println!("error: {e}"),
        }
    }
    println!("data: [DONE]");
}

//! The language-model collaborator.
//!
//! An async trait over the unit of one exchange, with no assumption about
//! where the decision comes from (local computation, a remote call, a
//! human). Here the "decision" is one model completion. The crate consumes
//! four logically distinct agents by name (`game_agent`, `puzzle_agent`,
//! `map_parser`, `item_parser`); each is just a `Box<dyn LanguageModel>` the
//! caller wires up independently — the trait does not know which logical
//! agent it backs.

use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_tokens: u32,
    pub cost_estimate: f64,
    pub latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct JsonRequest {
    pub messages: Vec<Message>,
    pub system_prompt: String,
    pub schema: Value,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<CompletionResponse>;

    /// Returns a JSON value nominally conforming to `req.schema`. Whether it
    /// actually does is the caller's problem to check — see
    /// [`complete_json_validated`], which layers a retry-then-sentinel
    /// policy on top of this raw call.
    async fn complete_json(&self, req: JsonRequest) -> anyhow::Result<Value>;
}

/// Calls `lm.complete_json`, deserializes the result into `T`, and on
/// failure retries up to `max_retries` times with the prior attempt and the
/// deserialization error appended to the conversation as feedback. Gives up
/// after the retry budget and returns `T::default()` as the sentinel empty
/// object.
pub async fn complete_json_validated<T>(
    lm: &dyn LanguageModel,
    mut req: JsonRequest,
    max_retries: u32,
) -> T
where
    T: DeserializeOwned + Default,
{
    for attempt in 0..=max_retries {
        let raw = match lm.complete_json(req.clone()).await {
            Ok(v) => v,
            Err(e) => {
                log::warn!("language model call failed (attempt {attempt}): {e}");
                continue;
            }
        };
        match serde_json::from_value::<T>(raw.clone()) {
            Ok(parsed) => return parsed,
            Err(e) => {
                log::warn!("structured-extraction validation failed (attempt {attempt}): {e}");
                req.messages.push(Message {
                    role: "assistant".into(),
                    content: raw.to_string(),
                });
                req.messages.push(Message {
                    role: "user".into(),
                    content: format!("That response did not validate against the schema: {e}. Try again."),
                });
            }
        }
    }
    log::warn!("structured extraction exhausted retries; returning empty sentinel");
    T::default()
}


#[cfg(test)]
mod tests {
    use super::test_double::RecordingLanguageModel;
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
    struct Payload {
        items: Vec<String>,
    }

    fn req() -> JsonRequest {
        JsonRequest {
            messages: vec![],
            system_prompt: "parse".into(),
            schema: serde_json::json!({}),
            temperature: 0.0,
            max_tokens: 100,
        }
    }

    #[tokio::test]
    async fn validates_first_try_success() {
        let lm = RecordingLanguageModel::new();
        lm.push_json(serde_json::json!({"items": ["leaflet"]}));
        let out: Payload = complete_json_validated(&lm, req(), 3).await;
        assert_eq!(out, Payload { items: vec!["leaflet".into()] });
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let lm = RecordingLanguageModel::new();
        lm.push_json(serde_json::json!({"not_items": []}));
        lm.push_json(serde_json::json!({"items": ["garlic"]}));
        let out: Payload = complete_json_validated(&lm, req(), 3).await;
        assert_eq!(out, Payload { items: vec!["garlic".into()] });
        assert_eq!(lm.seen_json.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn exhausts_retries_to_sentinel() {
        let lm = RecordingLanguageModel::new();
        for _ in 0..5 {
            lm.push_json(serde_json::json!({"garbage": true}));
        }
        let out: Payload = complete_json_validated(&lm, req(), 3).await;
        assert_eq!(out, Payload::default());
        assert_eq!(lm.seen_json.lock().unwrap().len(), 4);
    }
}

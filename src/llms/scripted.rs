//! Offline provider that replays canned responses.
//!
//! Used by tests and by the server's `scripted` mode. Replies are consumed
//! in order; once the queue is empty the optional responder closure answers,
//! and without one every call fails.

use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::LlmError;
use crate::llms::base_llm::{BaseLLM, CallOptions, ChatMessage};

type Responder = Box<dyn Fn(&[ChatMessage]) -> Result<String, LlmError> + Send + Sync>;

pub struct ScriptedLLM {
    model: String,
    replies: Mutex<VecDeque<Result<String, String>>>,
    responder: Option<Responder>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl fmt::Debug for ScriptedLLM {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedLLM")
            .field("model", &self.model)
            .field("queued", &self.replies.lock().len())
            .field("has_responder", &self.responder.is_some())
            .finish()
    }
}

impl ScriptedLLM {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            model: "scripted".to_string(),
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            responder: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer calls that arrive after the queue is drained.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Echo the last user message back, prefixed with the system prompt's
    /// first line. Useful for running the server without a provider.
    pub fn echo() -> Self {
        Self::new(Vec::new()).with_responder(|messages| {
            let system = messages
                .iter()
                .find(|m| m.role == "system")
                .and_then(|m| m.content.lines().next())
                .unwrap_or("");
            let user = messages
                .iter()
                .rev()
                .find(|m| m.role == "user")
                .map(|m| m.content.as_str())
                .unwrap_or("");
            Ok(format!("[{}] {}", system, user))
        })
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(Ok(reply.into()));
    }

    /// Queue a failing call.
    pub fn push_error(&self, message: impl Into<String>) {
        self.replies.lock().push_back(Err(message.into()));
    }

    /// Every message list received so far, in call order.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl BaseLLM for ScriptedLLM {
    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> &str {
        "scripted"
    }

    async fn acall(
        &self,
        messages: &[ChatMessage],
        _options: &CallOptions,
    ) -> Result<String, LlmError> {
        self.calls.lock().push(messages.to_vec());
        let next = self.replies.lock().pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(LlmError::Status {
                status: 500,
                body: message,
            }),
            None => match &self.responder {
                Some(responder) => responder(messages),
                None => Err(LlmError::Exhausted("no scripted replies left".into())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order_then_exhausted() {
        let llm = ScriptedLLM::new(vec!["one".into()]);
        llm.push_error("boom");
        let opts = CallOptions::default();
        assert_eq!(llm.acall(&[ChatMessage::user("a")], &opts).await.unwrap(), "one");
        assert!(llm.acall(&[ChatMessage::user("b")], &opts).await.is_err());
        assert!(matches!(
            llm.acall(&[], &opts).await.unwrap_err(),
            LlmError::Exhausted(_)
        ));
        assert_eq!(llm.call_count(), 3);
        assert_eq!(llm.calls()[1][0].content, "b");
    }

    #[tokio::test]
    async fn test_echo_responder() {
        let llm = ScriptedLLM::echo();
        let out = llm
            .acall(
                &[ChatMessage::system("You are a copywriter.\nMore"), ChatMessage::user("ads")],
                &CallOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(out, "[You are a copywriter.] ads");
    }
}

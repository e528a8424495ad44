use crate::agent::{Conversation, PromptComposer, SessionPool, parse_tool_uses, strip_tool_uses};
use crate::traits::{ChatMessage, ChatRequest, Provider, ProviderEvent};
use anyhow::Result;
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_MAX_ITERATIONS: usize = 10;
const DEFAULT_MAX_HISTORY: usize = 50;

/// Progress reported while a run is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Model output as it arrives.
    Token(String),
    ToolCall {
        name: String,
        arguments: Value,
        known: bool,
    },
    ToolResult {
        name: String,
        is_error: bool,
        output: String,
    },
    IterationLimit {
        max: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub answer: String,
    /// Number of completion calls made.
    pub iterations: usize,
    pub limit_reached: bool,
}

/// Drives one user message through model calls and tool calls until the model
/// answers without requesting a tool.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    composer: PromptComposer,
    pool: SessionPool,
    max_iterations: usize,
    max_history: usize,
    stream: bool,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, composer: PromptComposer, pool: SessionPool) -> Self {
        Self {
            provider,
            composer,
            pool,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_history: DEFAULT_MAX_HISTORY,
            stream: true,
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.stream = enabled;
        self
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut SessionPool {
        &mut self.pool
    }

    pub async fn process(&self, conversation: &mut Conversation, message: &str) -> Result<RunOutcome> {
        self.run(conversation, message, |_| {}).await
    }

    pub async fn run<F>(
        &self,
        conversation: &mut Conversation,
        message: &str,
        mut on_event: F,
    ) -> Result<RunOutcome>
    where
        F: FnMut(AgentEvent),
    {
        let system_prompt = self.composer.system_prompt(self.pool.catalog());

        let mut messages = Vec::with_capacity(self.max_history + 4);
        if !system_prompt.trim().is_empty() {
            messages.push(ChatMessage::system(system_prompt));
        }
        messages.extend_from_slice(conversation.recent(self.max_history));

        let user_turn = ChatMessage::user(message);
        messages.push(user_turn.clone());
        conversation.push(user_turn);

        let mut iteration = 0;
        loop {
            iteration += 1;
            debug!(iteration, turns = messages.len(), "Requesting completion");
            let response = self.complete(&messages, &mut on_event).await?;

            let assistant_turn = ChatMessage::assistant(response.clone());
            messages.push(assistant_turn.clone());
            conversation.push(assistant_turn);

            let requests = parse_tool_uses(&response);

            if requests.is_empty() {
                conversation.record_exchange(message, &response);
                return Ok(RunOutcome {
                    answer: response,
                    iterations: iteration,
                    limit_reached: false,
                });
            }

            // Requests in the final allowed response are never run.
            if iteration >= self.max_iterations {
                warn!(
                    max = self.max_iterations,
                    pending = requests.len(),
                    "Tool loop limit exceeded"
                );
                on_event(AgentEvent::IterationLimit {
                    max: self.max_iterations,
                });
                let answer = strip_tool_uses(&response);
                conversation.record_exchange(message, &answer);
                return Ok(RunOutcome {
                    answer,
                    iterations: iteration,
                    limit_reached: true,
                });
            }

            for request in &requests {
                let known = self.pool.catalog().contains(&request.tool_name);
                info!(
                    tool = %request.tool_name,
                    arguments = %request.arguments,
                    known,
                    "Model requested tool"
                );
                on_event(AgentEvent::ToolCall {
                    name: request.tool_name.clone(),
                    arguments: request.arguments.clone(),
                    known,
                });
            }

            let results = self.pool.dispatch(&requests).await;
            for result in &results {
                on_event(AgentEvent::ToolResult {
                    name: result.tool_name.clone(),
                    is_error: result.is_error,
                    output: result.text(),
                });
            }

            let results_turn = ChatMessage::tool_results(results);
            messages.push(results_turn.clone());
            conversation.push(results_turn);
        }
    }

    /// Like [`Self::run`], but gives up as soon as `cancel` completes. The
    /// abandoned run is dropped, which also drops any in-flight tool call,
    /// and the conversation is rolled back to how it was before `message`.
    /// Returns `Ok(None)` when cancelled.
    pub async fn run_until<F, C>(
        &self,
        conversation: &mut Conversation,
        message: &str,
        on_event: F,
        cancel: C,
    ) -> Result<Option<RunOutcome>>
    where
        F: FnMut(AgentEvent),
        C: Future,
    {
        let checkpoint = conversation.checkpoint();

        let outcome = tokio::select! {
            outcome = self.run(conversation, message, on_event) => Some(outcome),
            _ = cancel => None,
        };

        match outcome {
            Some(outcome) => outcome.map(Some),
            None => {
                conversation.rollback(checkpoint);
                info!("Run cancelled");
                Ok(None)
            }
        }
    }

    async fn complete<F>(&self, messages: &[ChatMessage], on_event: &mut F) -> Result<String>
    where
        F: FnMut(AgentEvent),
    {
        let request = ChatRequest { messages };

        if self.stream && self.provider.supports_streaming() {
            let mut stream = self.provider.chat_stream(request).await?;
            let mut text = String::new();

            while let Some(event) = stream.next().await {
                match event {
                    ProviderEvent::Token(token) => {
                        text.push_str(&token);
                        on_event(AgentEvent::Token(token));
                    }
                    ProviderEvent::Error(e) => {
                        return Err(anyhow::anyhow!("Completion stream failed: {}", e));
                    }
                    ProviderEvent::Done => break,
                }
            }

            Ok(text)
        } else {
            let response = self.provider.chat(request).await?;
            let text = response.text_or_empty().to_string();
            if !text.is_empty() {
                on_event(AgentEvent::Token(text.clone()));
            }
            Ok(text)
        }
    }

    /// Releases every tool provider. Call on every exit path.
    pub async fn shutdown(&mut self) {
        self.pool.close_all().await;
    }
}

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use mcpilot_core::agent::{AgentEvent, AgentLoop, Conversation, PromptComposer, SessionPool, compose, parse_tool_uses};
use mcpilot_core::mcp::McpError;
use mcpilot_core::{
    ChatMessage, ChatRequest, ChatResponse, ContentBlock, Provider, ProviderEvent, Role,
    ServerSpec, ToolCatalog, ToolDescriptor, ToolInvocationResult, ToolSession,
};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replays canned replies and records every request it receives.
struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    streaming: bool,
    fail_stream: bool,
    /// 1-based call whose stream stalls forever after its tokens.
    stall_on_call: Option<usize>,
}

impl ScriptedProvider {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            streaming: true,
            fail_stream: false,
            stall_on_call: None,
        }
    }

    fn repeating(reply: &str) -> Self {
        Self {
            fallback: Some(reply.to_string()),
            ..Self::new(&[])
        }
    }

    fn next_reply(&self, messages: &[ChatMessage]) -> String {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .expect("provider called more often than scripted")
    }

    fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
        Ok(ChatResponse {
            text: Some(self.next_reply(request.messages)),
        })
    }

    async fn chat_stream(
        &self,
        request: ChatRequest<'_>,
    ) -> anyhow::Result<BoxStream<'static, ProviderEvent>> {
        let reply = self.next_reply(request.messages);
        let call = self.requests.lock().unwrap().len();
        let chars: Vec<char> = reply.chars().collect();
        let mut events: Vec<ProviderEvent> = chars
            .chunks(7)
            .map(|c| ProviderEvent::Token(c.iter().collect()))
            .collect();
        if self.fail_stream {
            events.push(ProviderEvent::Error("connection reset".to_string()));
        }
        if self.stall_on_call == Some(call) {
            return Ok(futures_util::stream::iter(events)
                .chain(futures_util::stream::pending())
                .boxed());
        }
        events.push(ProviderEvent::Done);
        Ok(futures_util::stream::iter(events).boxed())
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }
}

/// In-memory tool provider.
struct FakeSession {
    name: String,
    tools: Vec<ToolDescriptor>,
    calls: Mutex<Vec<(String, Value)>>,
    fail: bool,
    closed: AtomicBool,
}

impl FakeSession {
    fn weather() -> Self {
        Self {
            name: "weather".to_string(),
            tools: vec![ToolDescriptor::new(
                "get_weather",
                "Get the weather in a given city",
                json!({"type": "object", "properties": {"city": {"type": "string"}}, "required": ["city"]}),
            )],
            calls: Mutex::new(Vec::new()),
            fail: false,
            closed: AtomicBool::new(false),
        }
    }

    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolSession for FakeSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    async fn invoke(
        &self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<ToolInvocationResult, McpError> {
        if self.is_closed() {
            return Err(McpError::Closed);
        }
        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_string(), arguments.clone()));
        if self.fail {
            return Err(McpError::Timeout(Duration::from_secs(60)));
        }
        let city = arguments["city"].as_str().unwrap_or("nowhere");
        Ok(ToolInvocationResult::success(
            tool_name,
            vec![ContentBlock::text(format!("The weather in {city} is sunny"))],
        ))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn tool_use(name: &str, args: &str) -> String {
    format!("<tool_use>\n  <name>{name}</name>\n  <arguments>{args}</arguments>\n</tool_use>")
}

fn agent_with(provider: Arc<ScriptedProvider>, session: Option<Arc<FakeSession>>) -> AgentLoop {
    let mut pool = SessionPool::new();
    if let Some(session) = session {
        pool.attach(session);
    }
    AgentLoop::new(provider, PromptComposer::new("You are a life assistant."), pool)
}

#[tokio::test]
async fn weather_call_round_trips_through_the_model() {
    let provider = Arc::new(ScriptedProvider::new(&[
        format!("Let me check.\n{}", tool_use("get_weather", r#"{"city":"Paris"}"#)).as_str(),
        "It is sunny in Paris.",
    ]));
    let session = Arc::new(FakeSession::weather());
    let agent = agent_with(provider.clone(), Some(session.clone()));

    let mut conversation = Conversation::new();
    let outcome = agent
        .process(&mut conversation, "What's the weather in Paris?")
        .await
        .unwrap();

    assert_eq!(outcome.answer, "It is sunny in Paris.");
    assert_eq!(outcome.iterations, 2);
    assert!(!outcome.limit_reached);
    assert_eq!(
        session.calls(),
        vec![("get_weather".to_string(), json!({"city": "Paris"}))]
    );

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);

    let first = &requests[0];
    assert_eq!(first[0].role, Role::System);
    assert!(first[0].content.contains("<name>get_weather</name>"));
    assert!(first[0].content.contains("You are a life assistant."));
    assert_eq!(first.last().unwrap().content, "What's the weather in Paris?");

    let second = &requests[1];
    assert_eq!(second.len(), first.len() + 2);
    assert_eq!(second[second.len() - 2].role, Role::Assistant);
    let results_turn = second.last().unwrap();
    assert_eq!(results_turn.role, Role::User);
    let results = results_turn.tool_results.as_ref().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].text(), "The weather in Paris is sunny");
    assert!(results_turn.content.contains("<result>The weather in Paris is sunny</result>"));
}

#[tokio::test]
async fn plain_answer_ends_after_one_call() {
    let provider = Arc::new(ScriptedProvider::new(&["Hello! How can I help?"]));
    let agent = agent_with(provider.clone(), Some(Arc::new(FakeSession::weather())));

    let mut conversation = Conversation::new();
    let outcome = agent.process(&mut conversation, "hi").await.unwrap();

    assert_eq!(outcome.answer, "Hello! How can I help?");
    assert_eq!(outcome.iterations, 1);
    assert_eq!(provider.requests().len(), 1);
    assert_eq!(conversation.len(), 2);
}

#[tokio::test]
async fn unknown_tool_yields_empty_result_turn() {
    let provider = Arc::new(ScriptedProvider::new(&[
        tool_use("delete_all", "{}").as_str(),
        "I cannot do that.",
    ]));
    let session = Arc::new(FakeSession::weather());
    let agent = agent_with(provider.clone(), Some(session.clone()));

    let mut events = Vec::new();
    let mut conversation = Conversation::new();
    let outcome = agent
        .run(&mut conversation, "wipe everything", |e| events.push(e))
        .await
        .unwrap();

    assert_eq!(outcome.answer, "I cannot do that.");
    assert!(session.calls().is_empty());

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    let results_turn = requests[1].last().unwrap();
    assert_eq!(results_turn.tool_results.as_deref(), Some(&[][..]));

    assert!(events.contains(&AgentEvent::ToolCall {
        name: "delete_all".to_string(),
        arguments: json!({}),
        known: false,
    }));
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::ToolResult { .. })));
}

#[tokio::test]
async fn unreachable_provider_leaves_remaining_tools_usable() {
    let provider = Arc::new(ScriptedProvider::new(&[
        tool_use("get_weather", r#"{"city": "Oslo"}"#).as_str(),
        "Sunny in Oslo.",
    ]));

    let mut pool = SessionPool::new().with_timeout(Duration::from_secs(5));
    pool.register(ServerSpec::new("broken", "mcpilot-no-such-provider-binary"));
    let report = pool.connect_all().await;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].provider, "broken");

    let session = Arc::new(FakeSession::weather());
    pool.attach(session.clone());
    assert_eq!(pool.catalog().names(), ["get_weather"]);

    let agent = AgentLoop::new(provider, PromptComposer::new(""), pool);
    let mut conversation = Conversation::new();
    let outcome = agent.process(&mut conversation, "Oslo?").await.unwrap();

    assert_eq!(outcome.answer, "Sunny in Oslo.");
    assert_eq!(session.calls().len(), 1);
}

#[tokio::test]
async fn iteration_cap_stops_a_model_that_never_finishes() {
    let provider = Arc::new(ScriptedProvider::repeating(&tool_use(
        "get_weather",
        r#"{"city": "Paris"}"#,
    )));
    let session = Arc::new(FakeSession::weather());
    let agent = agent_with(provider.clone(), Some(session.clone())).with_max_iterations(3);

    let mut events = Vec::new();
    let mut conversation = Conversation::new();
    let outcome = agent
        .run(&mut conversation, "loop forever", |e| events.push(e))
        .await
        .unwrap();

    assert!(outcome.limit_reached);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(provider.requests().len(), 3);
    // The third response's request is never executed.
    assert_eq!(session.calls().len(), 2);
    assert_eq!(events.last(), Some(&AgentEvent::IterationLimit { max: 3 }));
    assert_eq!(conversation.exchanges().len(), 1);
}

#[tokio::test]
async fn final_allowed_response_does_not_run_tools() {
    let provider = Arc::new(ScriptedProvider::repeating(&format!(
        "Checking.\n{}",
        tool_use("get_weather", r#"{"city": "Paris"}"#)
    )));
    let session = Arc::new(FakeSession::weather());
    let agent = agent_with(provider.clone(), Some(session.clone())).with_max_iterations(1);

    let mut events = Vec::new();
    let mut conversation = Conversation::new();
    let outcome = agent
        .run(&mut conversation, "Paris?", |e| events.push(e))
        .await
        .unwrap();

    assert!(outcome.limit_reached);
    assert_eq!(provider.requests().len(), 1);
    assert!(session.calls().is_empty());
    assert_eq!(outcome.answer, "Checking.");
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::ToolCall { .. })));

    let last = conversation.turns().last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert!(!last.is_tool_results());
}

#[tokio::test]
async fn cancelled_run_rolls_back_the_conversation() {
    let mut provider = ScriptedProvider::new(&["Hello Ada.", "Let me think about"]);
    provider.stall_on_call = Some(2);
    let agent = agent_with(Arc::new(provider), None);

    let mut conversation = Conversation::new();
    agent.process(&mut conversation, "I am Ada.").await.unwrap();
    let before = conversation.turns().to_vec();

    let mut tokens = Vec::new();
    let outcome = agent
        .run_until(
            &mut conversation,
            "Who am I?",
            |e| {
                if let AgentEvent::Token(t) = e {
                    tokens.push(t);
                }
            },
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    assert!(outcome.is_none());
    assert!(!tokens.is_empty());
    assert_eq!(conversation.turns(), &before[..]);
    assert_eq!(conversation.exchanges().len(), 1);
}

#[tokio::test]
async fn run_until_returns_the_outcome_when_not_cancelled() {
    let provider = Arc::new(ScriptedProvider::new(&["Done."]));
    let agent = agent_with(provider, None);

    let mut conversation = Conversation::new();
    let outcome = agent
        .run_until(&mut conversation, "hi", |_| {}, std::future::pending::<()>())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.answer, "Done.");
    assert_eq!(conversation.len(), 2);
}

#[tokio::test]
async fn failing_tool_is_reported_to_the_model() {
    let provider = Arc::new(ScriptedProvider::new(&[
        tool_use("get_weather", r#"{"city": "Paris"}"#).as_str(),
        "The weather service is down.",
    ]));
    let mut failing = FakeSession::weather();
    failing.fail = true;
    let agent = agent_with(provider.clone(), Some(Arc::new(failing)));

    let mut conversation = Conversation::new();
    let outcome = agent.process(&mut conversation, "Paris?").await.unwrap();
    assert_eq!(outcome.answer, "The weather service is down.");

    let requests = provider.requests();
    let results_turn = requests[1].last().unwrap();
    let results = results_turn.tool_results.as_ref().unwrap();
    assert!(results[0].is_error);
    assert!(results_turn.content.contains("<error>"));
}

#[tokio::test]
async fn tokens_are_streamed_progressively() {
    let answer = "Streaming answers arrive in several pieces.";
    let provider = Arc::new(ScriptedProvider::new(&[answer]));
    let agent = agent_with(provider, None);

    let mut tokens = Vec::new();
    let mut conversation = Conversation::new();
    agent
        .run(&mut conversation, "stream please", |e| {
            if let AgentEvent::Token(t) = e {
                tokens.push(t);
            }
        })
        .await
        .unwrap();

    assert!(tokens.len() > 1);
    assert_eq!(tokens.concat(), answer);
}

#[tokio::test]
async fn non_streaming_mode_delivers_one_token() {
    let mut provider = ScriptedProvider::new(&["Complete answer."]);
    provider.streaming = false;
    let agent = agent_with(Arc::new(provider), None);

    let mut tokens = Vec::new();
    let mut conversation = Conversation::new();
    agent
        .run(&mut conversation, "hi", |e| {
            if let AgentEvent::Token(t) = e {
                tokens.push(t);
            }
        })
        .await
        .unwrap();

    assert_eq!(tokens, ["Complete answer."]);
}

#[tokio::test]
async fn stream_failure_is_an_error() {
    let mut provider = ScriptedProvider::new(&["partial"]);
    provider.fail_stream = true;
    let agent = agent_with(Arc::new(provider), None);

    let mut conversation = Conversation::new();
    let err = agent.process(&mut conversation, "hi").await.unwrap_err();
    assert!(err.to_string().contains("connection reset"));
}

#[tokio::test]
async fn no_tools_sends_the_raw_system_prompt() {
    let provider = Arc::new(ScriptedProvider::new(&["ok"]));
    let agent = agent_with(provider.clone(), None);

    let mut conversation = Conversation::new();
    agent.process(&mut conversation, "hi").await.unwrap();

    let first = &provider.requests()[0];
    assert_eq!(first[0], ChatMessage::system("You are a life assistant."));
}

#[tokio::test]
async fn earlier_exchanges_are_replayed() {
    let provider = Arc::new(ScriptedProvider::new(&["Nice to meet you, Ada.", "Your name is Ada."]));
    let agent = agent_with(provider.clone(), None);

    let mut conversation = Conversation::new();
    agent.process(&mut conversation, "I am Ada.").await.unwrap();
    agent.process(&mut conversation, "Who am I?").await.unwrap();

    let second = &provider.requests()[1];
    let contents: Vec<_> = second.iter().skip(1).map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["I am Ada.", "Nice to meet you, Ada.", "Who am I?"]);

    let exchanges = conversation.exchanges();
    assert_eq!(exchanges.len(), 2);
    assert_eq!(exchanges[1].assistant, "Your name is Ada.");
}

#[tokio::test]
async fn shutdown_releases_sessions() {
    let provider = Arc::new(ScriptedProvider::new(&[]));
    let session = Arc::new(FakeSession::weather());
    let mut agent = agent_with(provider, Some(session.clone()));

    agent.shutdown().await;

    assert!(session.is_closed());
    assert!(agent.pool().catalog().is_empty());
}

#[test]
fn composed_prompt_and_parser_agree_on_tool_names() {
    let catalog: ToolCatalog = ["get_weather", "list_cities", "get_time"]
        .into_iter()
        .map(|name| ToolDescriptor::new(name, "", json!({"type": "object"})))
        .collect();

    let prompt = compose(&catalog, "");
    let reply: String = catalog
        .names()
        .iter()
        .filter(|name| prompt.contains(&format!("<name>{name}</name>")))
        .map(|name| tool_use(name, "{}"))
        .collect();

    let parsed: Vec<_> = parse_tool_uses(&reply)
        .into_iter()
        .map(|r| r.tool_name)
        .collect();
    assert_eq!(parsed, catalog.names());
}

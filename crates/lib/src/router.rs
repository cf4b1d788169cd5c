//! Response router: one inbound message in, at most one reply out.
//!
//! Strategies run in order and the first match wins: keyword shortcuts, template
//! replies, then the completion service. Local strategies never touch the network.
//! Completion failures and timeouts become a fixed apology; nothing propagates.

use crate::channels::InboundMessage;
use crate::config::{Config, PolicyKind};
use crate::llm::{CompletionRequest, CompletionService};
use crate::policy::{BrandPolicy, BRAND_SYSTEM_PROMPT, DEFAULT_SYSTEM_PROMPT};
use crate::templates::TemplateTable;
use std::sync::Arc;
use std::time::Duration;

pub const NO_ANSWER_REPLY: &str = "Sorry, I don't have an answer right now.";
pub const ERROR_REPLY: &str = "⚠️ Oops, I hit an error. Try again in a moment.";

/// Which rules run before the completion fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePolicy {
    /// Keyword shortcuts, template replies, then the brand persona.
    Brand,
    /// Straight to the model with the template-sourced persona.
    TemplatePrompt,
}

impl From<PolicyKind> for RoutePolicy {
    fn from(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::Brand => RoutePolicy::Brand,
            PolicyKind::TemplatePrompt => RoutePolicy::TemplatePrompt,
        }
    }
}

/// A local strategy: answers from in-process data or yields.
#[derive(Debug, Clone)]
pub enum Strategy {
    Keywords(BrandPolicy),
    Templates(TemplateTable),
}

impl Strategy {
    fn try_reply(&self, text: &str) -> Option<RouteOutcome> {
        match self {
            Strategy::Keywords(policy) => policy
                .find_reply(text)
                .map(|r| RouteOutcome::Keyword(r.to_string())),
            Strategy::Templates(table) => table
                .find_reply(text)
                .map(|r| RouteOutcome::Template(r.to_string())),
        }
    }
}

/// Model parameters for the completion fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl CompletionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.openai.model.clone(),
            temperature: config.openai.temperature,
            timeout: Duration::from_secs(config.openai.timeout_secs),
        }
    }
}

/// How a message was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Empty text or bot echo: send nothing.
    Ignored,
    Keyword(String),
    Template(String),
    /// Trimmed completion text.
    Completion(String),
    /// The service answered with no content.
    NoAnswer,
    /// The service failed or timed out.
    Errored,
}

impl RouteOutcome {
    /// Text to send back, or `None` when the message is ignored.
    pub fn reply(&self) -> Option<&str> {
        match self {
            RouteOutcome::Ignored => None,
            RouteOutcome::Keyword(s) | RouteOutcome::Template(s) | RouteOutcome::Completion(s) => {
                Some(s.as_str())
            }
            RouteOutcome::NoAnswer => Some(NO_ANSWER_REPLY),
            RouteOutcome::Errored => Some(ERROR_REPLY),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RouteOutcome::Ignored => "ignored",
            RouteOutcome::Keyword(_) => "keyword",
            RouteOutcome::Template(_) => "template",
            RouteOutcome::Completion(_) => "completion",
            RouteOutcome::NoAnswer => "no-answer",
            RouteOutcome::Errored => "error",
        }
    }
}

/// Immutable after construction; share it behind an `Arc` across message tasks.
pub struct ResponseRouter {
    strategies: Vec<Strategy>,
    system_prompt: String,
    completion: Arc<dyn CompletionService>,
    settings: CompletionSettings,
}

impl ResponseRouter {
    /// Build the router for `policy`.
    ///
    /// `Brand` runs keywords, then `templates`, then the brand persona.
    /// `TemplatePrompt` has no local strategies; its persona is the `system` entry under
    /// `prompt_key` in `templates`, or [`DEFAULT_SYSTEM_PROMPT`] when there is none.
    pub fn new(
        policy: RoutePolicy,
        templates: TemplateTable,
        prompt_key: &str,
        completion: Arc<dyn CompletionService>,
        settings: CompletionSettings,
    ) -> Self {
        match policy {
            RoutePolicy::Brand => Self::with_strategies(
                vec![
                    Strategy::Keywords(BrandPolicy::brand()),
                    Strategy::Templates(templates),
                ],
                BRAND_SYSTEM_PROMPT,
                completion,
                settings,
            ),
            RoutePolicy::TemplatePrompt => {
                let prompt = match templates.system_prompt(prompt_key) {
                    Some(p) => p.to_string(),
                    None => {
                        log::info!(
                            "no system prompt under template key {:?}, using default persona",
                            prompt_key
                        );
                        DEFAULT_SYSTEM_PROMPT.to_string()
                    }
                };
                Self::with_strategies(Vec::new(), prompt, completion, settings)
            }
        }
    }

    /// Build a router from an explicit strategy chain.
    pub fn with_strategies(
        strategies: Vec<Strategy>,
        system_prompt: impl Into<String>,
        completion: Arc<dyn CompletionService>,
        settings: CompletionSettings,
    ) -> Self {
        Self {
            strategies,
            system_prompt: system_prompt.into(),
            completion,
            settings,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Route one message. Always returns exactly one outcome.
    pub async fn route(&self, msg: &InboundMessage) -> RouteOutcome {
        let text = msg.text.trim();
        if msg.is_from_bot || text.is_empty() {
            return RouteOutcome::Ignored;
        }

        if let Some(outcome) = self.strategies.iter().find_map(|s| s.try_reply(text)) {
            return outcome;
        }

        self.complete(text, &msg.author_id).await
    }

    async fn complete(&self, text: &str, author_id: &str) -> RouteOutcome {
        let request = CompletionRequest {
            system_prompt: self.system_prompt.clone(),
            user_text: text.to_string(),
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
        };
        let call = self.completion.complete(&request);
        match tokio::time::timeout(self.settings.timeout, call).await {
            Ok(Ok(res)) => match res.text.as_deref().map(str::trim) {
                Some(t) if !t.is_empty() => RouteOutcome::Completion(t.to_string()),
                _ => RouteOutcome::NoAnswer,
            },
            Ok(Err(e)) => {
                log::warn!("router: completion for {} failed: {}", author_id, e);
                RouteOutcome::Errored
            }
            Err(_) => {
                log::warn!(
                    "router: completion for {} timed out after {:?}",
                    author_id,
                    self.settings.timeout
                );
                RouteOutcome::Errored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, LlmError};
    use crate::policy::{LEGLOCKS_REPLY, SKOOL_REPLY};
    use async_trait::async_trait;
    use std::sync::Mutex;

    enum Behavior {
        Reply(Option<&'static str>),
        Fail,
        Hang,
    }

    struct FakeCompletion {
        behavior: Behavior,
        calls: Mutex<Vec<CompletionRequest>>,
    }

    impl FakeCompletion {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<CompletionRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionService for FakeCompletion {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.calls.lock().unwrap().push(request.clone());
            match self.behavior {
                Behavior::Reply(text) => Ok(CompletionResponse {
                    text: text.map(str::to_string),
                }),
                Behavior::Fail => Err(LlmError::Api("500 boom".to_string())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(CompletionResponse::default())
                }
            }
        }
    }

    fn settings() -> CompletionSettings {
        CompletionSettings {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            timeout: Duration::from_millis(200),
        }
    }

    fn brand_router(templates: TemplateTable, fake: Arc<FakeCompletion>) -> ResponseRouter {
        ResponseRouter::new(RoutePolicy::Brand, templates, "default", fake, settings())
    }

    fn user(text: &str) -> InboundMessage {
        InboundMessage::new("slack", "C1", "U1", text)
    }

    #[tokio::test]
    async fn empty_and_bot_messages_are_ignored() {
        let fake = FakeCompletion::new(Behavior::Reply(Some("hi")));
        let router = brand_router(TemplateTable::default(), fake.clone());

        assert_eq!(router.route(&user("")).await, RouteOutcome::Ignored);
        assert_eq!(router.route(&user("   \n\t")).await, RouteOutcome::Ignored);
        let mut bot = user("skool");
        bot.is_from_bot = true;
        assert_eq!(router.route(&bot).await, RouteOutcome::Ignored);
        assert_eq!(RouteOutcome::Ignored.reply(), None);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn skool_link_scenario() {
        let fake = FakeCompletion::new(Behavior::Reply(Some("unused")));
        let router = brand_router(TemplateTable::default(), fake.clone());

        let out = router.route(&user("Where's the Skool link?")).await;
        assert_eq!(
            out.reply(),
            Some("Here's the Skool Academy link 👉 https://www.skool.com/gracie-trinity-academy")
        );
        assert_eq!(out, RouteOutcome::Keyword(SKOOL_REPLY.to_string()));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn leg_lock_scenario() {
        let fake = FakeCompletion::new(Behavior::Reply(Some("unused")));
        let router = brand_router(TemplateTable::default(), fake.clone());

        let out = router.route(&user("tell me about leg locks")).await;
        assert_eq!(
            out.reply(),
            Some("Leglocks for Dummies is here 🔗 https://leglocks.unclecoachkevin.com")
        );
        assert_eq!(out.reply(), Some(LEGLOCKS_REPLY));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn brand_keyword_beats_template() {
        let templates = TemplateTable::parse(r#"{ "link": "template link" }"#).expect("parse");
        let fake = FakeCompletion::new(Behavior::Reply(Some("unused")));
        let router = brand_router(templates, fake);

        let out = router.route(&user("send the skool link")).await;
        assert_eq!(out, RouteOutcome::Keyword(SKOOL_REPLY.to_string()));
    }

    #[tokio::test]
    async fn template_reply_before_completion() {
        let templates =
            TemplateTable::parse(r#"{ "schedule": "Classes: Mon/Wed/Fri 6pm", "price": "$29" }"#)
                .expect("parse");
        let fake = FakeCompletion::new(Behavior::Reply(Some("unused")));
        let router = brand_router(templates, fake.clone());

        let out = router.route(&user("What's the SCHEDULE and price?")).await;
        assert_eq!(out, RouteOutcome::Template("Classes: Mon/Wed/Fri 6pm".to_string()));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn completion_fallback_uses_brand_persona_and_trims() {
        let fake = FakeCompletion::new(Behavior::Reply(Some("\n  Knee cut, every time.  \n")));
        let router = brand_router(TemplateTable::default(), fake.clone());

        let out = router.route(&user("What's the best guard pass?")).await;
        assert_eq!(out, RouteOutcome::Completion("Knee cut, every time.".to_string()));

        let calls = fake.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].system_prompt, BRAND_SYSTEM_PROMPT);
        assert_eq!(calls[0].user_text, "What's the best guard pass?");
        assert_eq!(calls[0].model, "gpt-4o-mini");
        assert!((calls[0].temperature - 0.7).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn empty_or_missing_completion_is_no_answer() {
        for text in [None, Some(""), Some("   ")] {
            let fake = FakeCompletion::new(Behavior::Reply(text));
            let router = brand_router(TemplateTable::default(), fake);
            let out = router.route(&user("hello there")).await;
            assert_eq!(out, RouteOutcome::NoAnswer);
            assert_eq!(out.reply(), Some(NO_ANSWER_REPLY));
        }
    }

    #[tokio::test]
    async fn completion_failure_is_apology() {
        let fake = FakeCompletion::new(Behavior::Fail);
        let router = brand_router(TemplateTable::default(), fake.clone());

        let out = router.route(&user("hello there")).await;
        assert_eq!(out, RouteOutcome::Errored);
        assert_eq!(out.reply(), Some(ERROR_REPLY));
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn completion_timeout_is_apology() {
        let fake = FakeCompletion::new(Behavior::Hang);
        let router = brand_router(TemplateTable::default(), fake.clone());

        let out = router.route(&user("hello there")).await;
        assert_eq!(out, RouteOutcome::Errored);
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn template_prompt_policy_never_short_circuits() {
        let templates = TemplateTable::parse(
            r#"{ "default": { "system": "You are the gym front desk." }, "skool": "nope" }"#,
        )
        .expect("parse");
        let fake = FakeCompletion::new(Behavior::Reply(Some("Sure!")));
        let router = ResponseRouter::new(
            RoutePolicy::TemplatePrompt,
            templates,
            "default",
            fake.clone(),
            settings(),
        );

        let out = router.route(&user("skool link please")).await;
        assert_eq!(out, RouteOutcome::Completion("Sure!".to_string()));
        let calls = fake.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].system_prompt, "You are the gym front desk.");
    }

    #[tokio::test]
    async fn template_prompt_policy_falls_back_to_default_persona() {
        let fake = FakeCompletion::new(Behavior::Reply(Some("ok")));
        let router = ResponseRouter::new(
            RoutePolicy::TemplatePrompt,
            TemplateTable::default(),
            "default",
            fake,
            settings(),
        );
        assert_eq!(router.system_prompt(), DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn outcome_kinds() {
        assert_eq!(RouteOutcome::Keyword("x".into()).kind(), "keyword");
        assert_eq!(RouteOutcome::Errored.kind(), "error");
        assert_eq!(RouteOutcome::NoAnswer.reply(), Some(NO_ANSWER_REPLY));
    }
}

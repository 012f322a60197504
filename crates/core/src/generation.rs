use crate::config::EndpointConfig;
use crate::error::TutorError;
use crate::traits::Generator;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_GENERATION_MODEL: &str = "gpt-4o-mini";

/// Blocking client for OpenAI-compatible `/chat/completions` endpoints.
pub struct HttpGenerator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl HttpGenerator {
    pub fn new(config: &EndpointConfig, model: impl Into<String>) -> Result<Self, TutorError> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(TutorError::ConfigurationMissing(
                "generation model name".to_string(),
            ));
        }

        let base = config.url()?;
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base.as_str().trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model,
            temperature: 0.3,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

impl Generator for HttpGenerator {
    fn generate(&self, prompt: &str) -> Result<String, TutorError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(TutorError::Generation(format!(
                "{} returned {}: {}",
                self.endpoint, status, text
            )));
        }

        let parsed: ChatResponse = response.json()?;
        first_choice(parsed)
            .ok_or_else(|| TutorError::Generation("response carried no choices".to_string()))
    }
}

fn first_choice(response: ChatResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

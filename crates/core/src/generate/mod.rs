//! Generation adapter.
//! This module defines what the workflows need from a text model and a
//! prompt-building implementation that runs on any completion backend.

use crate::config::{BackendKind, GenerationConfig};
use crate::error::GenerationError;
use crate::srt::SrtBlock;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

pub mod gemini;
pub mod openai;
pub mod prompts;
mod sse;

/// Incremental text fragments of a streamed response, in order.
/// Dropping the stream abandons the request.
pub type FragmentStream = BoxStream<'static, Result<String, GenerationError>>;

/// The four requests the workflows issue.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Turn raw text into SRT whose block ids begin at `start_id`.
    async fn correct_chunk(&self, raw: &str, start_id: u32) -> Result<String, GenerationError>;

    /// Rewrite the text of `blocks` under `params`. The service is asked to
    /// keep count, ids and times, but callers must not rely on it.
    async fn enhance_batch(
        &self,
        blocks: &[SrtBlock],
        params: &EnhancementParams,
    ) -> Result<String, GenerationError>;

    /// Rewrite the text of one block. Returns plain, trimmed text.
    async fn regenerate_block(
        &self,
        text: &str,
        start_ms: u64,
        end_ms: u64,
    ) -> Result<String, GenerationError>;

    /// Restyle a whole document, delivered as a stream of fragments.
    async fn style_transfer(&self, srt: &str, style: &str)
        -> Result<FragmentStream, GenerationError>;
}

/// Cost/quality class of the model a request should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelTier {
    Fast,
    Quality,
}

/// A single prompt sent to a completion backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system: Option<String>,
    /// Sampling temperature, 0.0 to 1.0.
    pub temperature: f32,
    pub tier: ModelTier,
}

/// A text completion service, either one-shot or streamed.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError>;

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, GenerationError>;
}

/// [`Generator`] that builds prompts and hands them to a backend.
pub struct PromptedGenerator<B> {
    backend: B,
}

impl<B: CompletionBackend> PromptedGenerator<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B: CompletionBackend> Generator for PromptedGenerator<B> {
    async fn correct_chunk(&self, raw: &str, start_id: u32) -> Result<String, GenerationError> {
        trace!("correct_chunk chars={} start_id={start_id}", raw.len());
        self.backend.complete(prompts::correction(raw, start_id)).await
    }

    async fn enhance_batch(
        &self,
        blocks: &[SrtBlock],
        params: &EnhancementParams,
    ) -> Result<String, GenerationError> {
        trace!("enhance_batch blocks={}", blocks.len());
        self.backend
            .complete(prompts::enhancement(blocks, params))
            .await
    }

    async fn regenerate_block(
        &self,
        text: &str,
        start_ms: u64,
        end_ms: u64,
    ) -> Result<String, GenerationError> {
        let reply = self
            .backend
            .complete(prompts::regeneration(text, start_ms, end_ms))
            .await?;
        let reply = reply.trim();
        if reply.is_empty() {
            debug!("empty regeneration reply, keeping the current text");
            return Ok(text.to_string());
        }
        Ok(reply.to_string())
    }

    async fn style_transfer(
        &self,
        srt: &str,
        style: &str,
    ) -> Result<FragmentStream, GenerationError> {
        trace!("style_transfer chars={} style_chars={}", srt.len(), style.len());
        self.backend.stream(prompts::style_transfer(srt, style)).await
    }
}

/// Build the generator described by `config`.
/// Fails with a configuration error when the key is missing.
pub fn connect(config: &GenerationConfig) -> Result<Box<dyn Generator>, GenerationError> {
    Ok(match config.backend {
        BackendKind::Gemini => Box::new(PromptedGenerator::new(gemini::GeminiBackend::new(
            config,
        )?)),
        BackendKind::OpenAi => Box::new(PromptedGenerator::new(openai::OpenAiBackend::new(
            config,
        )?)),
    })
}

/// Declares a style control whose wire label is what the model sees and
/// whose CLI names are the lowercase English variants.
macro_rules! style_control {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal, $cli:literal;)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Label sent to the model.
            pub fn label(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $($name::$variant => $cli,)+
                })
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.to_string().eq_ignore_ascii_case(wanted) || v.label().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| {
                        let names: Vec<String> = $name::ALL.iter().map(|v| v.to_string()).collect();
                        format!("unknown value {wanted:?}, expected one of {}", names.join(", "))
                    })
            }
        }
    };
}

style_control!(
    /// How much the rewrite may repeat or reinforce ideas.
    Redundancy {
        Low => "Baixa", "low";
        Medium => "Média", "medium";
        High => "Alta", "high";
    }
);

style_control!(
    /// Emotional intensity of the rewrite.
    Emotion {
        Neutral => "Neutra", "neutral";
        Moderate => "Moderada", "moderate";
        High => "Alta", "high";
    }
);

style_control!(
    Humor {
        None => "Nenhum", "none";
        Light => "Leve", "light";
        Moderate => "Moderado", "moderate";
        Sarcastic => "Sarcástico", "sarcastic";
    }
);

style_control!(
    Pacing {
        Slow => "Lento", "slow";
        Balanced => "Equilibrado", "balanced";
        Dynamic => "Dinâmico", "dynamic";
    }
);

/// Style controls for a batch rewrite. They never change document shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancementParams {
    pub redundancy: Redundancy,
    pub emotion: Emotion,
    pub humor: Humor,
    pub pacing: Pacing,
    /// Free text hint such as "replace Bob with Robert".
    #[serde(default)]
    pub character_substitution: String,
}

impl Default for EnhancementParams {
    fn default() -> Self {
        Self {
            redundancy: Redundancy::Medium,
            emotion: Emotion::Neutral,
            humor: Humor::None,
            pacing: Pacing::Balanced,
            character_substitution: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::{Arc, Mutex};

    /// Backend that records requests and answers with a canned reply.
    #[derive(Clone, Default)]
    struct EchoBackend {
        reply: String,
        seen: Arc<Mutex<Vec<CompletionRequest>>>,
    }

    #[async_trait]
    impl CompletionBackend for EchoBackend {
        async fn complete(&self, request: CompletionRequest) -> Result<String, GenerationError> {
            self.seen.lock().unwrap().push(request);
            Ok(self.reply.clone())
        }

        async fn stream(
            &self,
            request: CompletionRequest,
        ) -> Result<FragmentStream, GenerationError> {
            self.seen.lock().unwrap().push(request);
            let parts: Vec<Result<String, GenerationError>> =
                vec![Ok("a".into()), Ok("b".into())];
            Ok(futures::stream::iter(parts).boxed())
        }
    }

    #[tokio::test]
    async fn correction_uses_fast_model_and_system_prompt() {
        let backend = EchoBackend {
            reply: "1\n00:00:00,000 --> 00:00:01,000\nOi\n".into(),
            ..Default::default()
        };
        let generator = PromptedGenerator::new(backend.clone());
        let out = generator.correct_chunk("oi tudo bem", 41).await.unwrap();
        assert!(out.contains("Oi"));
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].tier, ModelTier::Fast);
        assert!(seen[0].system.is_some());
        assert!(seen[0].prompt.contains("ID 41"));
    }

    #[tokio::test]
    async fn empty_regeneration_keeps_text() {
        let backend = EchoBackend {
            reply: "   \n".into(),
            ..Default::default()
        };
        let generator = PromptedGenerator::new(backend);
        let out = generator.regenerate_block("texto", 0, 1000).await.unwrap();
        assert_eq!(out, "texto");
    }

    #[tokio::test]
    async fn regeneration_reply_is_trimmed() {
        let backend = EchoBackend {
            reply: "\n  Novo texto.  \n".into(),
            ..Default::default()
        };
        let generator = PromptedGenerator::new(backend);
        let out = generator.regenerate_block("texto", 0, 1000).await.unwrap();
        assert_eq!(out, "Novo texto.");
    }

    #[tokio::test]
    async fn style_transfer_streams_from_backend() {
        let generator = PromptedGenerator::new(EchoBackend::default());
        let stream = generator.style_transfer("srt", "noir").await.unwrap();
        let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(parts, vec!["a", "b"]);
    }

    #[test]
    fn controls_parse_from_cli_names_and_labels() {
        assert_eq!("high".parse::<Redundancy>().unwrap(), Redundancy::High);
        assert_eq!("Sarcástico".parse::<Humor>().unwrap(), Humor::Sarcastic);
        assert_eq!(Pacing::Dynamic.label(), "Dinâmico");
        assert!("loud".parse::<Emotion>().is_err());
        assert_eq!(EnhancementParams::default().redundancy, Redundancy::Medium);
    }

    #[test]
    fn connect_requires_key() {
        let config = GenerationConfig::for_backend(BackendKind::Gemini);
        assert!(matches!(
            connect(&config),
            Err(GenerationError::Configuration(_))
        ));
        assert!(connect(&config.with_api_key("k")).is_ok());
    }
}

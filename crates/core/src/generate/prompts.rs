//! Prompt templates and sampling settings for each request variant.

use super::{CompletionRequest, EnhancementParams, ModelTier};
use crate::srt::{self, format_time, SrtBlock, CONTENT_RISK_MARKER};

pub const CORRECTION_TEMPERATURE: f32 = 0.2;
pub const REGENERATION_TEMPERATURE: f32 = 0.3;
pub const STYLE_TEMPERATURE: f32 = 0.6;
pub const ENHANCEMENT_TEMPERATURE: f32 = 0.7;

/// Characters of the style sample forwarded to the model.
pub const STYLE_SAMPLE_CHARS: usize = 500;

/// Fixed system instruction for correction and batch rewriting.
pub fn system_instruction() -> String {
    format!(
        "You are an expert specialist in transcription, semantic revision, narrative validation, and stylistic adaptation of long scripts.

Role Profile:
- Expertise: Absolute mastery of SRT format, Multilingual support, Long-form scripts (5-10+ hours).
- Primary Directive: NEVER invent content. Flag inconsistency risks. Preserve factual veracity.
- Length Constraint: The output content volume MUST strictly match the input volume (Tolerance +/- 10%).

Format Requirements for SRT:
- Standard SRT format with index, timestamp (00:00:00,000 --> 00:00:00,000), and text.
- Interval duration: Average 2 to 3 seconds per block.
- Max lines per block: 2.

Safety Protocol:
- If you detect a context error or potential hallucination in the source text, mark the block content with: {CONTENT_RISK_MARKER}"
    )
}

/// Grammar correction plus temporal split of one raw chunk.
pub fn correction(raw: &str, start_id: u32) -> CompletionRequest {
    let prompt = format!(
        "TASK: CORREÇÃO + DIVISÃO TEMPORAL SRT

Instructions:
1. Correct grammar/semantics of the text below.
2. Split into SRT blocks (2-3 seconds each).
3. IMPORTANT: Start numbering blocks at ID {start_id}.
4. Return ONLY the valid SRT output.

Input Text:
\"\"\"
{raw}
\"\"\""
    );
    CompletionRequest {
        prompt,
        system: Some(system_instruction()),
        temperature: CORRECTION_TEMPERATURE,
        tier: ModelTier::Fast,
    }
}

/// Narrative rewrite of a batch that must keep ids and timestamps.
pub fn enhancement(blocks: &[SrtBlock], params: &EnhancementParams) -> CompletionRequest {
    let first = blocks.first().map_or(0, |b| b.id);
    let last = blocks.last().map_or(0, |b| b.id);
    let substitution = match params.character_substitution.trim() {
        "" => String::new(),
        hint => format!("\n  - Character substitution: {hint}"),
    };
    let prompt = format!(
        "TASK: OTIMIZAÇÃO NARRATIVA EM LOTE (SRT)

Objective: Rewrite the subtitle text to be more engaging and fluid based on parameters, BUT KEEP EXACT TIMESTAMPS AND IDs.

Parameters:
  - Redundancy: {redundancy}
  - Emotion: {emotion}
  - Humor: {humor}
  - Pacing: {pacing}{substitution}

Strict Rules:
1. You must return exactly {count} blocks.
2. Use the exact same IDs: {first} to {last}.
3. Use the exact same Timestamps.
4. Only change the text content.

Input SRT Chunk:
\"\"\"
{input}
\"\"\"

Output: Provide valid SRT format for these blocks.",
        redundancy = params.redundancy.label(),
        emotion = params.emotion.label(),
        humor = params.humor.label(),
        pacing = params.pacing.label(),
        count = blocks.len(),
        input = srt::format(blocks),
    );
    CompletionRequest {
        prompt,
        system: Some(system_instruction()),
        temperature: ENHANCEMENT_TEMPERATURE,
        tier: ModelTier::Quality,
    }
}

/// Rewrite of a single block's text, answered as plain lines.
pub fn regeneration(text: &str, start_ms: u64, end_ms: u64) -> CompletionRequest {
    let prompt = format!(
        "TASK: REGENERATE SPECIFIC SRT BLOCK

Timestamp: {} --> {}
Original Flawed Text: \"{text}\"

Instruction: Rewrite the text to be semantically correct and natural. Return ONLY the text lines.",
        format_time(start_ms),
        format_time(end_ms),
    );
    CompletionRequest {
        prompt,
        system: None,
        temperature: REGENERATION_TEMPERATURE,
        tier: ModelTier::Quality,
    }
}

/// Whole-document style transfer guided by a sample of the target voice.
pub fn style_transfer(srt_text: &str, style: &str) -> CompletionRequest {
    let sample: String = style.chars().take(STYLE_SAMPLE_CHARS).collect();
    let prompt = format!(
        "TASK: STYLE TRANSFER
Style: \"{sample}...\"

Apply this style to the SRT below. Maintain strict SRT format.

Input SRT:
\"\"\"
{srt_text}
\"\"\""
    );
    CompletionRequest {
        prompt,
        system: None,
        temperature: STYLE_TEMPERATURE,
        tier: ModelTier::Quality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{Humor, Redundancy};

    fn blocks() -> Vec<SrtBlock> {
        vec![
            SrtBlock::new(11, 0, 2_000, "um"),
            SrtBlock::new(12, 2_000, 4_000, "dois"),
            SrtBlock::new(13, 4_000, 6_000, "três"),
        ]
    }

    #[test]
    fn correction_prompt_carries_start_id() {
        let req = correction("texto cru", 15);
        assert!(req.prompt.contains("Start numbering blocks at ID 15."));
        assert!(req.prompt.contains("texto cru"));
        assert_eq!(req.temperature, CORRECTION_TEMPERATURE);
        assert!(req.system.unwrap().contains(CONTENT_RISK_MARKER));
    }

    #[test]
    fn enhancement_prompt_lists_every_control() {
        let params = EnhancementParams {
            redundancy: Redundancy::High,
            humor: Humor::Sarcastic,
            character_substitution: "Ana -> Maria".into(),
            ..Default::default()
        };
        let req = enhancement(&blocks(), &params);
        assert!(req.prompt.contains("Redundancy: Alta"));
        assert!(req.prompt.contains("Emotion: Neutra"));
        assert!(req.prompt.contains("Humor: Sarcástico"));
        assert!(req.prompt.contains("Pacing: Equilibrado"));
        assert!(req.prompt.contains("Character substitution: Ana -> Maria"));
        assert!(req.prompt.contains("exactly 3 blocks"));
        assert!(req.prompt.contains("IDs: 11 to 13"));
        assert!(req.prompt.contains("13\n00:00:04,000 --> 00:00:06,000\ntrês"));
        assert_eq!(req.tier, ModelTier::Quality);
    }

    #[test]
    fn enhancement_prompt_omits_empty_substitution() {
        let req = enhancement(&blocks(), &EnhancementParams::default());
        assert!(!req.prompt.contains("Character substitution"));
    }

    #[test]
    fn regeneration_prompt_has_times_and_no_system() {
        let req = regeneration("frase ruim", 1_500, 3_000);
        assert!(req.prompt.contains("00:00:01,500 --> 00:00:03,000"));
        assert!(req.prompt.contains("\"frase ruim\""));
        assert!(req.system.is_none());
    }

    #[test]
    fn style_sample_is_truncated() {
        let style = "ç".repeat(900);
        let req = style_transfer("1\n00:00:00,000 --> 00:00:01,000\nA\n", &style);
        let expected = format!("Style: \"{}...\"", "ç".repeat(STYLE_SAMPLE_CHARS));
        assert!(req.prompt.contains(&expected));
        assert!(!req.prompt.contains(&"ç".repeat(STYLE_SAMPLE_CHARS + 1)));
        assert_eq!(req.temperature, STYLE_TEMPERATURE);
    }
}

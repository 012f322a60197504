use regex::{Captures, Regex};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseMode {
    Question,
    Quiz,
    Summary,
    Explanation,
}

impl ResponseMode {
    /// Number of chunks retrieved for this mode.
    pub fn top_k(&self) -> usize {
        match self {
            ResponseMode::Question | ResponseMode::Explanation => 3,
            ResponseMode::Quiz | ResponseMode::Summary => 5,
        }
    }

    pub fn template_file(&self) -> &'static str {
        match self {
            ResponseMode::Question => "system_prompt.txt",
            ResponseMode::Quiz => "quiz_prompt.txt",
            ResponseMode::Summary => "summarize_prompt.txt",
            ResponseMode::Explanation => "explain_prompt.txt",
        }
    }

    fn fallback_template(&self) -> &'static str {
        match self {
            ResponseMode::Question => "Context: {context}\n\nQuestion: {question}\n\nAnswer:",
            ResponseMode::Quiz => "Create {num_questions} questions about {topic} from: {context}",
            ResponseMode::Summary => "Summarize {topic} from: {context}",
            ResponseMode::Explanation => "Explain {concept} simply from: {context}",
        }
    }
}

const MODES: [ResponseMode; 4] = [
    ResponseMode::Question,
    ResponseMode::Quiz,
    ResponseMode::Summary,
    ResponseMode::Explanation,
];

/// Externally defined prompt templates, one per response mode. Slots are
/// written `{name}`; `{{` and `}}` produce literal braces.
#[derive(Debug, Clone, Default)]
pub struct PromptTemplates {
    question: Option<String>,
    quiz: Option<String>,
    summary: Option<String>,
    explanation: Option<String>,
}

impl PromptTemplates {
    pub fn load(dir: &Path) -> Self {
        let mut templates = Self::default();
        for mode in MODES {
            let path = dir.join(mode.template_file());
            match fs::read_to_string(&path) {
                Ok(template) => templates.set(mode, template),
                Err(error) => {
                    warn!(path = %path.display(), %error, "prompt template not found, using fallback")
                }
            }
        }
        templates
    }

    pub fn set(&mut self, mode: ResponseMode, template: impl Into<String>) {
        let slot = match mode {
            ResponseMode::Question => &mut self.question,
            ResponseMode::Quiz => &mut self.quiz,
            ResponseMode::Summary => &mut self.summary,
            ResponseMode::Explanation => &mut self.explanation,
        };
        *slot = Some(template.into());
    }

    pub fn template(&self, mode: ResponseMode) -> &str {
        let configured = match mode {
            ResponseMode::Question => &self.question,
            ResponseMode::Quiz => &self.quiz,
            ResponseMode::Summary => &self.summary,
            ResponseMode::Explanation => &self.explanation,
        };
        configured
            .as_deref()
            .unwrap_or_else(|| mode.fallback_template())
    }

    pub fn render(&self, mode: ResponseMode, slots: &[(&str, &str)]) -> String {
        render(self.template(mode), slots)
    }
}

fn slot_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("slot pattern is valid"))
}

/// Fills `{name}` slots; unknown slots are left as written.
pub fn render(template: &str, slots: &[(&str, &str)]) -> String {
    slot_pattern()
        .replace_all(template, |captures: &Captures| {
            let whole = &captures[0];
            match captures.get(1) {
                Some(name) => slots
                    .iter()
                    .find(|(slot, _)| *slot == name.as_str())
                    .map(|(_, value)| (*value).to_string())
                    .unwrap_or_else(|| whole.to_string()),
                None if whole == "{{" => "{".to_string(),
                None => "}".to_string(),
            }
        })
        .into_owned()
}

/// What a free-form chat message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Ask(String),
    Quiz(String),
    Summarize(String),
    Explain(String),
}

fn words_pattern(words: &[&str]) -> Regex {
    let alternatives = words
        .iter()
        .map(|word| regex::escape(word))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternatives})\b")).expect("escaped keywords form a valid pattern")
}

struct IntentPatterns {
    quiz: Regex,
    quiz_filler: Regex,
    summary: Regex,
    summary_filler: Regex,
    explain: Regex,
}

fn intent_patterns() -> &'static IntentPatterns {
    static PATTERNS: OnceLock<IntentPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| IntentPatterns {
        quiz: words_pattern(&["quiz", "test", "practice", "mcq", "mcqs", "questions"]),
        quiz_filler: words_pattern(&[
            "quiz", "test", "practice", "mcq", "mcqs", "questions", "on", "about", "give", "me",
            "create", "a", "an", "some",
        ]),
        summary: words_pattern(&["summarize", "summarise", "summary", "brief", "overview", "tldr"]),
        summary_filler: words_pattern(&[
            "summarize", "summarise", "summary", "brief", "overview", "tldr", "give", "me", "a",
            "an", "of", "about", "on",
        ]),
        explain: words_pattern(&["explain", "how does", "why does", "help me understand"]),
    })
}

fn strip_filler(input: &str, filler: &Regex) -> String {
    filler
        .replace_all(input, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl Intent {
    /// Keyword classifier: quiz, then summary, then explanation, otherwise
    /// a plain question. Always yields exactly one intent.
    pub fn detect(input: &str) -> Self {
        let patterns = intent_patterns();
        let trimmed = input.trim();

        if patterns.quiz.is_match(trimmed) {
            let topic = strip_filler(trimmed, &patterns.quiz_filler);
            return Intent::Quiz(if topic.is_empty() { trimmed.to_string() } else { topic });
        }

        if patterns.summary.is_match(trimmed) {
            let topic = strip_filler(trimmed, &patterns.summary_filler);
            return Intent::Summarize(if topic.is_empty() { trimmed.to_string() } else { topic });
        }

        if patterns.explain.is_match(trimmed) {
            return Intent::Explain(trimmed.to_string());
        }

        Intent::Ask(trimmed.to_string())
    }

    pub fn mode(&self) -> ResponseMode {
        match self {
            Intent::Ask(_) => ResponseMode::Question,
            Intent::Quiz(_) => ResponseMode::Quiz,
            Intent::Summarize(_) => ResponseMode::Summary,
            Intent::Explain(_) => ResponseMode::Explanation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn slots_are_filled_and_braces_unescaped() {
        let rendered = render(
            "{{json}} {topic}: {context} {missing}",
            &[("topic", "vectors"), ("context", "ctx")],
        );
        assert_eq!(rendered, "{json} vectors: ctx {missing}");
    }

    #[test]
    fn fallback_templates_cover_every_slot() {
        let templates = PromptTemplates::default();
        let quiz = templates.render(
            ResponseMode::Quiz,
            &[("num_questions", "5"), ("topic", "optics"), ("context", "lenses")],
        );
        assert_eq!(quiz, "Create 5 questions about optics from: lenses");

        let question = templates.render(
            ResponseMode::Question,
            &[("question", "What is work?"), ("context", "[Page 4]: work")],
        );
        assert!(question.contains("Question: What is work?"));
    }

    #[test]
    fn templates_load_from_directory_with_fallbacks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("explain_prompt.txt"), "Teach {concept} using {context}")?;

        let templates = PromptTemplates::load(dir.path());

        assert_eq!(
            templates.template(ResponseMode::Explanation),
            "Teach {concept} using {context}"
        );
        assert_eq!(
            templates.template(ResponseMode::Summary),
            "Summarize {topic} from: {context}"
        );
        Ok(())
    }

    #[test]
    fn mode_top_k_is_fixed() {
        assert_eq!(ResponseMode::Question.top_k(), 3);
        assert_eq!(ResponseMode::Explanation.top_k(), 3);
        assert_eq!(ResponseMode::Quiz.top_k(), 5);
        assert_eq!(ResponseMode::Summary.top_k(), 5);
    }

    #[test]
    fn quiz_requests_strip_command_words() {
        assert_eq!(
            Intent::detect("Give me a quiz on vectors"),
            Intent::Quiz("vectors".to_string())
        );
        assert_eq!(Intent::detect("quiz"), Intent::Quiz("quiz".to_string()));
    }

    #[test]
    fn summary_keeps_words_containing_filler() {
        assert_eq!(
            Intent::detect("Summarize chapter 1 about momentum"),
            Intent::Summarize("chapter 1 momentum".to_string())
        );
        assert_eq!(
            Intent::detect("brief overview of atoms"),
            Intent::Summarize("atoms".to_string())
        );
    }

    #[test]
    fn explanations_and_questions() {
        assert_eq!(
            Intent::detect("Explain momentum simply"),
            Intent::Explain("Explain momentum simply".to_string())
        );
        assert_eq!(
            Intent::detect("How does friction work?").mode(),
            ResponseMode::Explanation
        );
        assert_eq!(
            Intent::detect("What is Newton's first law?"),
            Intent::Ask("What is Newton's first law?".to_string())
        );
        assert_eq!(Intent::detect("contest results").mode(), ResponseMode::Question);
    }
}

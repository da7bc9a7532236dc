//! Cleanup of raw model output.
//!
//! Models wrap answers in markdown fences or announce themselves
//! ("Story_Agent: ...") even when told not to. [`Sanitizer`] removes those
//! artifacts with an ordered list of rules. One pass applies every rule once,
//! in order, then trims. Passes repeat until the text stops changing, so a
//! removal that exposes a new match (a fence split around a language tag) is
//! still cleaned and `clean(clean(x)) == clean(x)`.

use std::sync::LazyLock;

use regex::{NoExpand, Regex};

/// Opening or closing code fence, with an optional language tag.
pub const FENCE_PATTERN: &str = r"```[A-Za-z0-9_+\-]*";

/// Speaker announcements injected by the story agents, longest first.
pub const SPEAKER_PREFIXES: [&str; 4] = [
    "Story_agent: Initiating sequence.",
    "Story_Agent: Processing… Initiating adventure.",
    "Story_Agent: ",
    "Story_agent:",
];

static DEFAULT_SANITIZER: LazyLock<Sanitizer> = LazyLock::new(Sanitizer::default);

/// Clean `raw` with the default rules.
pub fn sanitize(raw: &str) -> String {
    DEFAULT_SANITIZER.clean(raw)
}

/// A single (pattern, replacement) rewrite.
#[derive(Debug, Clone)]
pub struct SanitizeRule {
    pattern: Regex,
    replacement: String,
}

impl SanitizeRule {
    /// Remove every occurrence of `text` (case-sensitive, no regex syntax).
    pub fn literal(text: &str) -> Self {
        Self {
            pattern: Regex::new(&regex::escape(text))
                .expect("escaped literal is a valid regex"),
            replacement: String::new(),
        }
    }

    /// Replace every match of `pattern` with `replacement` (taken verbatim).
    pub fn pattern(pattern: &str, replacement: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: replacement.to_string(),
        })
    }

    fn apply(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, NoExpand(&self.replacement))
            .into_owned()
    }
}

/// Ordered rule list applied to every model response.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    rules: Vec<SanitizeRule>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        let mut rules =
            vec![SanitizeRule::pattern(FENCE_PATTERN, "").expect("fence pattern is valid")];
        rules.extend(SPEAKER_PREFIXES.iter().map(|prefix| SanitizeRule::literal(prefix)));
        Self { rules }
    }
}

impl Sanitizer {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule; it runs after every rule already present.
    pub fn with_rule(mut self, rule: SanitizeRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append literal removals, skipping empty strings.
    pub fn with_literals<I, S>(mut self, literals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for literal in literals {
            let literal = literal.as_ref();
            if !literal.is_empty() {
                self.rules.push(SanitizeRule::literal(literal));
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply the rules and trim, repeating until the text is stable.
    ///
    /// Passes that shrink the text always continue. Passes that change it
    /// without shrinking (only possible with non-empty replacements) are
    /// capped by the input length.
    pub fn clean(&self, raw: &str) -> String {
        let mut current = raw.trim().to_string();
        let mut non_shrinking = current.len() + 1;
        loop {
            let next = self.pass(&current);
            if next == current {
                break;
            }
            if next.len() >= current.len() {
                if non_shrinking == 0 {
                    break;
                }
                non_shrinking -= 1;
            }
            current = next;
        }
        current
    }

    fn pass(&self, text: &str) -> String {
        let mut out = text.to_string();
        for rule in &self.rules {
            out = rule.apply(&out);
        }
        out.trim().to_string()
    }
}

//! Brand policy: fixed keyword-to-link replies that bypass the model, plus the brand persona.

/// Persona for the brand policy's completion fallback.
pub const BRAND_SYSTEM_PROMPT: &str = "\
You are **Brand GPT** for Kevin Gallagher (a.k.a. Uncle Coach Kevin).
Goal: write helpful, on-brand responses about BJJ/MMA, coaching, products, and content.

Voice & style:
- Direct, funny, motivational; expert in BJJ/MMA; practical and clear.
- Short actionable answers first; add context if asked.

Products & links (use when relevant):
- Skool Academy: https://www.skool.com/gracie-trinity-academy
- Leglocks for Dummies: https://leglocks.unclecoachkevin.com

General rules:
- If the user asks for the Skool link, give it (exact URL above).
- If they ask about leglocks course, give the Leglocks link.
- Never claim you can't share links; use the ones above.
- You do NOT access private data. If asked about personal info, say you don't store private info and pivot to help.
- If a request matches a known template (if provided), prefer that tone and structure.
";

/// Persona used by the template-prompt policy when the template file has none.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer clearly and concisely.";

pub const SKOOL_REPLY: &str =
    "Here's the Skool Academy link 👉 https://www.skool.com/gracie-trinity-academy";

pub const LEGLOCKS_REPLY: &str =
    "Leglocks for Dummies is here 🔗 https://leglocks.unclecoachkevin.com";

/// True if `text` contains any of `needles`, ignoring case. Empty needles never match.
pub fn contains_any<S: AsRef<str>>(text: &str, needles: &[S]) -> bool {
    let haystack = text.to_lowercase();
    needles.iter().any(|n| {
        let n = n.as_ref();
        !n.is_empty() && haystack.contains(&n.to_lowercase())
    })
}

/// One keyword group and the reply it triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordRule {
    pub keywords: Vec<String>,
    pub reply: String,
}

impl KeywordRule {
    pub fn new<I, S>(keywords: I, reply: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            reply: reply.into(),
        }
    }

    fn matches(&self, text: &str) -> bool {
        contains_any(text, &self.keywords)
    }
}

/// Ordered keyword rules. Earlier rules win when several match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrandPolicy {
    rules: Vec<KeywordRule>,
}

impl BrandPolicy {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }

    /// Skool and Leglocks shortcuts, in that order.
    pub fn brand() -> Self {
        Self::new(vec![
            KeywordRule::new(["skool", "academy", "course platform"], SKOOL_REPLY),
            KeywordRule::new(
                ["leglock", "leg lock", "leglocks for dummies"],
                LEGLOCKS_REPLY,
            ),
        ])
    }

    /// Reply of the first rule with a keyword contained in `text`.
    pub fn find_reply(&self, text: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|r| r.matches(text))
            .map(|r| r.reply.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_any_is_case_insensitive_substring() {
        assert!(contains_any("Where's the SKOOL link?", &["skool"]));
        assert!(contains_any("leglocks4life", &["leglock"]));
        assert!(!contains_any("nothing here", &["skool", "leglock"]));
    }

    #[test]
    fn contains_any_ignores_empty_needles() {
        assert!(!contains_any("anything", &[""]));
    }

    #[test]
    fn skool_keywords_hit_skool_reply() {
        let p = BrandPolicy::brand();
        for text in [
            "Where's the Skool link?",
            "is the ACADEMY open",
            "which course platform do you use",
            "xxskoolxx",
        ] {
            assert_eq!(p.find_reply(text), Some(SKOOL_REPLY), "{text}");
        }
    }

    #[test]
    fn leglock_keywords_hit_leglocks_reply() {
        let p = BrandPolicy::brand();
        for text in ["tell me about leg locks", "LEGLOCK entries", "Leglocks for Dummies?"] {
            assert_eq!(p.find_reply(text), Some(LEGLOCKS_REPLY), "{text}");
        }
    }

    #[test]
    fn first_group_wins_when_both_match() {
        let p = BrandPolicy::brand();
        assert_eq!(
            p.find_reply("is the leglock course on skool?"),
            Some(SKOOL_REPLY)
        );
    }

    #[test]
    fn no_keyword_no_reply() {
        assert_eq!(BrandPolicy::brand().find_reply("What's the best guard pass?"), None);
        assert_eq!(BrandPolicy::default().find_reply("skool"), None);
    }
}

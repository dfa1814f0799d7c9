//! Subject validation and wildcard pattern matching.
//!
//! Pure and stateless, as required by `spec.md` §4.1: a subject is a
//! dot-delimited token string, a pattern is the same grammar plus the
//! single-token wildcard `*` and the trailing multi-token wildcard `>`.
//! Patterns are compiled once (split into an owned token vector) and
//! matched by token-array comparison rather than a regex — the simplest
//! implementation that still lets a trie/LRU-cache variant replace this
//! one later without changing the public shape (`compile_pattern`/
//! `matches`).

use super::error::InvalidSubject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Literal(&'a str),
    Star,
    TailGlob,
}

/// Validate a subject (publish) or pattern (subscribe) string.
///
/// When `allow_wildcards` is `false`, `*` and `>` are rejected as literal
/// characters (publish subjects may never contain them, per `spec.md`
/// §3 and §4.1).
pub fn validate_subject(subject: &str, allow_wildcards: bool) -> Result<(), InvalidSubject> {
    if subject.is_empty() {
        return Err(InvalidSubject::Empty);
    }

    let tokens: Vec<&str> = subject.split('.').collect();
    for (position, token) in tokens.iter().enumerate() {
        if token.is_empty() {
            return Err(InvalidSubject::EmptyToken(position));
        }

        if *token == "*" {
            if !allow_wildcards {
                return Err(InvalidSubject::WildcardInPublish);
            }
            continue;
        }

        if *token == ">" {
            if !allow_wildcards {
                return Err(InvalidSubject::TailWildcardInPublish);
            }
            if position != tokens.len() - 1 {
                return Err(InvalidSubject::TailWildcardNotLast);
            }
            continue;
        }

        if let Some((offset, bad_char)) = token
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            let _ = offset;
            return Err(InvalidSubject::IllegalCharacter {
                position,
                token: bad_char.to_string(),
            });
        }
    }

    Ok(())
}

/// A subscription pattern compiled into owned tokens for repeated matching.
///
/// Compilation only validates and tokenizes; it performs no allocation
/// beyond the token vector, keeping `matches()` a cheap slice walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledMatcher {
    tokens: Vec<CompiledToken>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CompiledToken {
    Literal(String),
    Star,
    TailGlob,
}

impl CompiledMatcher {
    /// Validate and compile a subscription pattern.
    pub fn compile(pattern: &str) -> Result<Self, InvalidSubject> {
        validate_subject(pattern, true)?;
        let tokens = pattern
            .split('.')
            .map(|raw| match classify(raw) {
                Token::Literal(s) => CompiledToken::Literal(s.to_string()),
                Token::Star => CompiledToken::Star,
                Token::TailGlob => CompiledToken::TailGlob,
            })
            .collect();
        Ok(Self { tokens })
    }

    /// Test whether `subject` matches this compiled pattern.
    ///
    /// `subject` is assumed to already be a validated publish subject;
    /// callers that accept untrusted input should run [`validate_subject`]
    /// first.
    pub fn matches(&self, subject: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split('.').collect();
        match_tokens(&self.tokens, &subject_tokens)
    }

    /// The raw pattern string reconstructed from compiled tokens, mainly
    /// useful for diagnostics and logging.
    pub fn pattern(&self) -> String {
        self.tokens
            .iter()
            .map(|t| match t {
                CompiledToken::Literal(s) => s.as_str(),
                CompiledToken::Star => "*",
                CompiledToken::TailGlob => ">",
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

fn classify(raw: &str) -> Token<'_> {
    match raw {
        "*" => Token::Star,
        ">" => Token::TailGlob,
        other => Token::Literal(other),
    }
}

fn match_tokens(pattern: &[CompiledToken], subject: &[&str]) -> bool {
    let mut p = 0;
    let mut s = 0;
    while p < pattern.len() {
        match &pattern[p] {
            CompiledToken::TailGlob => {
                // '>' must be last (enforced at compile time) and matches
                // one or more trailing tokens.
                return s < subject.len();
            }
            CompiledToken::Star => {
                if s >= subject.len() {
                    return false;
                }
                p += 1;
                s += 1;
            }
            CompiledToken::Literal(lit) => {
                if s >= subject.len() || subject[s] != lit.as_str() {
                    return false;
                }
                p += 1;
                s += 1;
            }
        }
    }
    p == pattern.len() && s == subject.len()
}

/// Validate then compile a subscription pattern in one call.
pub fn compile_pattern(pattern: &str) -> Result<CompiledMatcher, InvalidSubject> {
    CompiledMatcher::compile(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_subject() {
        assert!(validate_subject("relay.agent.claude", false).is_ok());
    }

    #[test]
    fn rejects_empty_subject() {
        assert_eq!(validate_subject("", false), Err(InvalidSubject::Empty));
    }

    #[test]
    fn rejects_empty_token() {
        assert!(matches!(
            validate_subject("foo..bar", false),
            Err(InvalidSubject::EmptyToken(1))
        ));
    }

    #[test]
    fn rejects_wildcards_in_publish_subjects() {
        assert!(matches!(
            validate_subject("relay.*", false),
            Err(InvalidSubject::WildcardInPublish)
        ));
        assert!(matches!(
            validate_subject("relay.>", false),
            Err(InvalidSubject::TailWildcardInPublish)
        ));
    }

    #[test]
    fn allows_wildcards_in_patterns() {
        assert!(validate_subject("relay.agent.*", true).is_ok());
        assert!(validate_subject("relay.agent.>", true).is_ok());
        assert!(validate_subject(">", true).is_ok());
    }

    #[test]
    fn tail_wildcard_must_be_last_token() {
        assert!(matches!(
            validate_subject("relay.>.agent", true),
            Err(InvalidSubject::TailWildcardNotLast)
        ));
    }

    #[test]
    fn rejects_illegal_characters() {
        assert!(validate_subject("relay agent", false).is_err());
        assert!(validate_subject("relay.age nt", false).is_err());
    }

    #[test]
    fn underscores_and_dashes_are_legal_tokens() {
        assert!(validate_subject("relay.agent_one.sub-two", false).is_ok());
    }

    #[test]
    fn star_matches_exactly_one_token() {
        let m = compile_pattern("relay.agent.*").unwrap();
        assert!(m.matches("relay.agent.claude"));
        assert!(!m.matches("relay.agent.claude.extra"));
        assert!(!m.matches("relay.agent"));
    }

    #[test]
    fn tail_glob_matches_one_or_more_trailing_tokens() {
        let m = compile_pattern("relay.agent.>").unwrap();
        assert!(m.matches("relay.agent.claude"));
        assert!(m.matches("relay.agent.claude.turn.1"));
        assert!(!m.matches("relay.agent"));
    }

    #[test]
    fn bare_tail_glob_matches_any_non_empty_subject() {
        let m = compile_pattern(">").unwrap();
        assert!(m.matches("a"));
        assert!(m.matches("a.b.c"));
    }

    #[test]
    fn consecutive_stars_each_consume_one_token() {
        let m = compile_pattern("*.*.*").unwrap();
        assert!(m.matches("a.b.c"));
        assert!(!m.matches("a.b"));
        assert!(!m.matches("a.b.c.d"));
    }

    #[test]
    fn literal_pattern_requires_exact_match() {
        let m = compile_pattern("relay.agent.claude").unwrap();
        assert!(m.matches("relay.agent.claude"));
        assert!(!m.matches("relay.agent.codex"));
    }

    #[test]
    fn pattern_round_trips_through_compile() {
        let m = compile_pattern("relay.*.>").unwrap();
        assert_eq!(m.pattern(), "relay.*.>");
    }
}

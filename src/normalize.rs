// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Canonical quiz identifiers.
//!
//! Every tier and the sync queue key on the canonical id, so two spellings of
//! the same quiz can never end up as two records (or, worse, one record read
//! under the other's key).
//!
//! Canonicalization:
//! 1. split camelCase boundaries (`testerMindset` → `tester-Mindset`)
//! 2. lowercase, trim, whitespace/underscores → `-`
//! 3. drop everything outside `[a-z0-9-]`, collapse repeated `-`, trim `-`
//! 4. resolve aliases (legacy names, `-quiz` suffixes) against the registry
//!
//! ```
//! use quiz_sync::normalize::normalize;
//!
//! assert_eq!(normalize("  Tester_Mindset "), "tester-mindset");
//! assert_eq!(normalize("testerMindset"), "tester-mindset");
//! assert_eq!(normalize("BVT"), "build-verification");
//! assert_eq!(normalize(&normalize("Email Testing Quiz")), normalize("Email Testing Quiz"));
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

/// Canonical quiz ids known to the registry.
pub const CANONICAL_QUIZZES: &[&str] = &[
    "automation-interview",
    "build-verification",
    "cms-testing",
    "communication",
    "content-copy",
    "email-testing",
    "exploratory-testing",
    "fully-scripted",
    "functional-interview",
    "initiative",
    "issue-tracking-tools",
    "issue-verification",
    "locale-testing",
    "non-functional",
    "raising-tickets",
    "reports",
    "risk-analysis",
    "risk-management",
    "sanity-smoke",
    "script-metrics-troubleshooting",
    "standard-script-testing",
    "test-support",
    "test-types-tricks",
    "tester-mindset",
    "time-management",
];

/// Legacy spellings. Keys and values are given already slugged.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("bvt", "build-verification"),
    ("build-verification-testing", "build-verification"),
    ("cms", "cms-testing"),
    ("communication-skills", "communication"),
    ("content-copy-testing", "content-copy"),
    ("copy-testing", "content-copy"),
    ("email", "email-testing"),
    ("exploratory", "exploratory-testing"),
    ("issue-tracking", "issue-tracking-tools"),
    ("locale", "locale-testing"),
    ("localisation", "locale-testing"),
    ("localization", "locale-testing"),
    ("mindset", "tester-mindset"),
    ("tester-mind-set", "tester-mindset"),
    ("non-functional-testing", "non-functional"),
    ("nonfunctional", "non-functional"),
    ("raising-tickets-quiz", "raising-tickets"),
    ("tickets", "raising-tickets"),
    ("sanity-smoke-testing", "sanity-smoke"),
    ("smoke-sanity", "sanity-smoke"),
    ("script-metrics", "script-metrics-troubleshooting"),
    ("standard-script", "standard-script-testing"),
    ("test-types", "test-types-tricks"),
    ("time-mgmt", "time-management"),
];

static DEFAULT_NORMALIZER: LazyLock<NameNormalizer> = LazyLock::new(NameNormalizer::new);

/// Normalize with the built-in registry.
#[must_use]
pub fn normalize(raw: &str) -> String {
    DEFAULT_NORMALIZER.normalize(raw)
}

/// Slug step without alias resolution.
#[must_use]
pub fn slugify(raw: &str) -> String {
    let mut spaced = String::with_capacity(raw.len() + 4);
    let mut prev_lower_or_digit = false;
    for ch in raw.trim().chars() {
        if ch.is_uppercase() && prev_lower_or_digit {
            spaced.push('-');
        }
        prev_lower_or_digit = ch.is_lowercase() || ch.is_ascii_digit();
        spaced.push(ch);
    }

    let mut out = String::with_capacity(spaced.len());
    for ch in spaced.to_lowercase().chars() {
        let mapped = if ch.is_whitespace() || ch == '_' {
            '-'
        } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' {
            ch
        } else {
            continue;
        };
        if mapped == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(mapped);
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Alias-aware normalizer. Build once and share.
#[derive(Debug, Clone)]
pub struct NameNormalizer {
    /// slug → canonical id; no value is ever a key
    aliases: HashMap<String, String>,
}

impl NameNormalizer {
    /// Built-in registry only.
    #[must_use]
    pub fn new() -> Self {
        Self::with_aliases(std::iter::empty::<(String, String)>())
    }

    /// Built-in registry plus extra aliases. Extra keys and values are slugged;
    /// chains (`a → b → c`) are flattened and cycles dropped.
    pub fn with_aliases<I, K, V>(extra: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut raw: HashMap<String, String> = BUILTIN_ALIASES
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        for (k, v) in extra {
            let (k, v) = (slugify(k.as_ref()), slugify(v.as_ref()));
            if !k.is_empty() && !v.is_empty() && k != v {
                raw.insert(k, v);
            }
        }

        // A `-quiz` target whose stem is known would be rewritten again by
        // normalize(), so strip it here.
        let known: HashSet<String> = raw.keys().cloned().collect();
        for target in raw.values_mut() {
            if let Some(stem) = target.strip_suffix("-quiz") {
                if known.contains(stem) || CANONICAL_QUIZZES.contains(&stem) {
                    *target = stem.to_string();
                }
            }
        }

        // Flatten so every value is a fixpoint; that is what keeps
        // normalize() idempotent.
        let mut aliases = HashMap::with_capacity(raw.len());
        for key in raw.keys() {
            let mut target = &raw[key];
            let mut hops = 0;
            while let Some(next) = raw.get(target) {
                hops += 1;
                if hops > raw.len() {
                    break;
                }
                target = next;
            }
            if hops <= raw.len() && target != key {
                aliases.insert(key.clone(), target.clone());
            }
        }
        Self { aliases }
    }

    /// Canonical id for `raw`. Idempotent: `normalize(normalize(x)) == normalize(x)`.
    #[must_use]
    pub fn normalize(&self, raw: &str) -> String {
        let slug = self.strip_quiz_suffix(slugify(raw));
        match self.aliases.get(&slug) {
            Some(canonical) => canonical.clone(),
            None => slug,
        }
    }

    /// `email-testing-quiz-quiz` → `email-testing`. Peels every trailing
    /// `-quiz` and keeps the shortest stem that is known; unknown slugs are
    /// left whole.
    fn strip_quiz_suffix(&self, slug: String) -> String {
        let mut stem = slug.as_str();
        let mut known = None;
        while let Some(shorter) = stem.strip_suffix("-quiz") {
            stem = shorter;
            if self.aliases.contains_key(stem) || CANONICAL_QUIZZES.contains(&stem) {
                known = Some(stem.len());
            }
        }
        match known {
            Some(len) => slug[..len].to_string(),
            None => slug,
        }
    }

    /// Whether `id` is a registered canonical quiz.
    #[must_use]
    pub fn is_known(&self, id: &str) -> bool {
        CANONICAL_QUIZZES.contains(&id)
    }
}

impl Default for NameNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basics() {
        assert_eq!(slugify("  Risk Analysis  "), "risk-analysis");
        assert_eq!(slugify("risk__analysis"), "risk-analysis");
        assert_eq!(slugify("Risk---Analysis!!"), "risk-analysis");
        assert_eq!(slugify("CMS-Testing"), "cms-testing");
        assert_eq!(slugify("-_-"), "");
        assert_eq!(slugify("émail testing"), "mail-testing");
    }

    #[test]
    fn test_camel_case_variants() {
        assert_eq!(normalize("testerMindset"), "tester-mindset");
        assert_eq!(normalize("TimeManagement"), "time-management");
        assert_eq!(normalize("issueTrackingTools"), "issue-tracking-tools");
    }

    #[test]
    fn test_legacy_aliases() {
        assert_eq!(normalize("Communication Skills"), "communication");
        assert_eq!(normalize("nonFunctional"), "non-functional");
        assert_eq!(normalize("sanity_smoke_testing"), "sanity-smoke");
        assert_eq!(normalize("email-testing-quiz"), "email-testing");
        assert_eq!(normalize("bvt-quiz"), "build-verification");
        assert_eq!(normalize("email-testing-quiz-quiz"), "email-testing");
    }

    #[test]
    fn test_repeated_quiz_suffixes_are_peeled() {
        assert_eq!(normalize("Email Testing Quiz Quiz"), "email-testing");
        assert_eq!(normalize("bvt-quiz-quiz-quiz"), "build-verification");
        assert_eq!(normalize("brand-new-quiz-quiz"), "brand-new-quiz-quiz");
        for raw in ["email-testing-quiz-quiz", "brand-new-quiz-quiz", "risk-analysis-quiz"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_unknown_ids_pass_through_slugged() {
        assert_eq!(normalize("Brand New Quiz"), "brand-new-quiz");
        assert_eq!(normalize("brand-new"), "brand-new");
    }

    #[test]
    fn test_canonical_ids_are_fixpoints() {
        for id in CANONICAL_QUIZZES {
            assert_eq!(normalize(id), *id);
        }
    }

    #[test]
    fn test_extra_aliases_flatten_chains() {
        let normalizer = NameNormalizer::with_aliases([
            ("Old Name", "Middle Name"),
            ("middle_name", "communication-skills"),
        ]);
        assert_eq!(normalizer.normalize("oldName"), "communication");
        assert_eq!(normalizer.normalize("middle name"), "communication");
    }

    #[test]
    fn test_extra_alias_to_suffixed_name_stays_idempotent() {
        let normalizer = NameNormalizer::with_aliases([("comms", "communication quiz")]);
        assert_eq!(normalizer.normalize("comms"), "communication");
        assert_eq!(normalizer.normalize("communication"), "communication");
    }

    #[test]
    fn test_extra_alias_cycles_are_dropped() {
        let normalizer = NameNormalizer::with_aliases([("ping", "pong"), ("pong", "ping")]);
        let once = normalizer.normalize("ping");
        assert_eq!(normalizer.normalize(&once), once);
    }
}

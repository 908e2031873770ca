//! Identifier registry.
//!
//! Finds vulnerability identifiers in free text and rewrites each raw match
//! into its canonical form. Matching and normalization are pure; a registry
//! is built once and shared read-only across workers.

mod family;

pub use family::FamilyTag;

use regex::{Captures, Match, Regex};
use std::collections::BTreeSet;
use thiserror::Error;

use family::{FamilySpec, FAMILIES};

/// Errors raised while building a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid identifier pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Unknown identifier family: {0}")]
    UnknownFamily(String),

    #[error("No identifier families enabled")]
    NoFamilies,
}

struct CompiledFamily {
    tag: FamilyTag,
    claim: Regex,
    canonical: Regex,
    template: &'static str,
    bounded: bool,
}

impl CompiledFamily {
    fn compile(spec: &FamilySpec) -> Result<Self, RegistryError> {
        Ok(Self {
            tag: spec.tag,
            claim: Regex::new(spec.claim)?,
            canonical: Regex::new(spec.canonical)?,
            template: spec.template,
            bounded: spec.bounded,
        })
    }

    fn canonicalize(&self, upper: &str) -> Option<String> {
        let caps: Captures<'_> = self.canonical.captures(upper)?;
        let mut out = String::with_capacity(upper.len());
        caps.expand(self.template, &mut out);
        Some(out)
    }
}

/// Ordered set of identifier families.
pub struct IdentifierRegistry {
    families: Vec<CompiledFamily>,
    union: Regex,
}

impl IdentifierRegistry {
    /// Registry with every known family enabled.
    pub fn new() -> Result<Self, RegistryError> {
        Self::with_families(&FamilyTag::ALL)
    }

    /// Registry restricted to `tags`. Table order is kept regardless of the
    /// order of `tags`.
    pub fn with_families(tags: &[FamilyTag]) -> Result<Self, RegistryError> {
        let specs: Vec<&FamilySpec> = FAMILIES.iter().filter(|f| tags.contains(&f.tag)).collect();
        if specs.is_empty() {
            return Err(RegistryError::NoFamilies);
        }

        let alternatives: Vec<String> = specs
            .iter()
            .flat_map(|f| f.shapes.iter())
            .map(|shape| format!("(?:{shape})"))
            .collect();
        let union = Regex::new(&format!("(?i){}", alternatives.join("|")))?;

        let families = specs
            .into_iter()
            .map(CompiledFamily::compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { families, union })
    }

    /// Enabled family tags, in table order, without repeats.
    pub fn families(&self) -> Vec<FamilyTag> {
        let mut tags: Vec<FamilyTag> = Vec::new();
        for family in &self.families {
            if !tags.contains(&family.tag) {
                tags.push(family.tag);
            }
        }
        tags
    }

    /// Raw, non-overlapping matches in `text`, in order of appearance.
    pub fn raw_matches<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.union
            .find_iter(text)
            .filter(move |m| self.stands_alone(text, m))
            .map(|m| m.as_str())
    }

    /// Canonical identifiers mentioned in `text`.
    pub fn find(&self, text: &str) -> BTreeSet<String> {
        self.raw_matches(text).map(|raw| self.normalize(raw)).collect()
    }

    /// Canonical form of one raw match.
    ///
    /// The first family whose prefix claims the upper-cased input decides.
    /// When it claims the input but cannot rebuild it, the upper-cased input
    /// is returned as is.
    pub fn normalize(&self, raw: &str) -> String {
        let upper = raw.trim().to_uppercase();
        match self.claiming(&upper) {
            Some(family) => family.canonicalize(&upper).unwrap_or(upper),
            None => upper,
        }
    }

    /// Family of an identifier, if any enabled family produces it.
    pub fn family_of(&self, identifier: &str) -> Option<FamilyTag> {
        let upper = identifier.trim().to_uppercase();
        let family = self.claiming(&upper)?;
        family.canonical.is_match(&upper).then_some(family.tag)
    }

    /// Neighbour check for bounded families, e.g. `ms08_067_netapi` counts
    /// but `ITEMS08-067` and `MS08-0671` do not.
    fn stands_alone(&self, text: &str, m: &Match<'_>) -> bool {
        let bounded = self
            .claiming(&m.as_str().to_uppercase())
            .is_some_and(|family| family.bounded);
        if !bounded {
            return true;
        }
        let glued_before = text[..m.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric());
        let glued_after = text[m.end()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit());
        !glued_before && !glued_after
    }

    fn claiming(&self, upper: &str) -> Option<&CompiledFamily> {
        self.families.iter().find(|f| f.claim.is_match(upper))
    }
}

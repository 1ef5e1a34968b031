//! Glossary translation between wire (short) names and display (long) names.
//!
//! Services compress parameter and attribute names on the wire. The glossary
//! maps each short name to a readable long name and back:
//!
//! - **Encoding** ([`Glossary::to_schema_name`]): long -> short, applied to
//!   request parameter keys before dispatch.
//! - **Decoding** ([`Glossary::to_display_name`]): short -> long, applied to
//!   decoded attribute names presented to callers.
//!
//! Lookup misses return the input unchanged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::params::ParamMap;

/// A single short/long name pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryTerm {
    /// Name used on the wire and in the schema.
    pub short_name: String,
    /// Readable name presented to callers.
    pub long_name: String,
    /// Optional free-text description of the term.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl GlossaryTerm {
    /// Creates a term without a description.
    #[must_use]
    pub fn new(short_name: impl Into<String>, long_name: impl Into<String>) -> Self {
        Self {
            short_name: short_name.into(),
            long_name: long_name.into(),
            description: None,
        }
    }
}

/// Errors raised while assembling a glossary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GlossaryError {
    #[error("duplicate glossary short name: {0}")]
    DuplicateShortName(String),
    #[error("duplicate glossary long name: {0}")]
    DuplicateLongName(String),
}

/// Bidirectional term mapping with unique short and long names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Glossary {
    terms: Vec<GlossaryTerm>,
    by_short: HashMap<String, usize>,
    by_long: HashMap<String, usize>,
}

impl Glossary {
    /// Builds a glossary from a list of terms.
    ///
    /// # Errors
    ///
    /// Returns `GlossaryError` when two terms share a short name or a long name.
    pub fn new(terms: Vec<GlossaryTerm>) -> Result<Self, GlossaryError> {
        let mut by_short = HashMap::with_capacity(terms.len());
        let mut by_long = HashMap::with_capacity(terms.len());

        for (idx, term) in terms.iter().enumerate() {
            if by_short.insert(term.short_name.clone(), idx).is_some() {
                return Err(GlossaryError::DuplicateShortName(term.short_name.clone()));
            }
            if by_long.insert(term.long_name.clone(), idx).is_some() {
                return Err(GlossaryError::DuplicateLongName(term.long_name.clone()));
            }
        }

        Ok(Self {
            terms,
            by_short,
            by_long,
        })
    }

    /// Returns the terms in declaration order.
    #[must_use]
    pub fn terms(&self) -> &[GlossaryTerm] {
        &self.terms
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Looks up a term by its short name (decoding view).
    pub fn term_by_short(&self, short_name: impl AsRef<str>) -> Option<&GlossaryTerm> {
        self.by_short
            .get(short_name.as_ref())
            .map(|&idx| &self.terms[idx])
    }

    /// Looks up a term by its long name (encoding view).
    pub fn term_by_long(&self, long_name: impl AsRef<str>) -> Option<&GlossaryTerm> {
        self.by_long
            .get(long_name.as_ref())
            .map(|&idx| &self.terms[idx])
    }

    /// Translates a long name to its schema (short) name, or returns it unchanged.
    pub fn to_schema_name(&self, long_name: impl AsRef<str>) -> String {
        let name = long_name.as_ref();
        self.term_by_long(name)
            .map_or_else(|| name.to_string(), |term| term.short_name.clone())
    }

    /// Translates a schema (short) name to its display (long) name, or returns it unchanged.
    pub fn to_display_name(&self, short_name: impl AsRef<str>) -> String {
        let name = short_name.as_ref();
        self.term_by_short(name)
            .map_or_else(|| name.to_string(), |term| term.long_name.clone())
    }

    /// Rewrites every top-level key of `params` from long to short names.
    ///
    /// Nested keys are left untouched; the glossary only covers operation
    /// parameters, not the inner shape of their values.
    #[must_use]
    pub fn apply_to_params(&self, params: ParamMap) -> ParamMap {
        params
            .into_iter()
            .map(|(name, value)| (self.to_schema_name(&name), value))
            .collect()
    }

    /// Inserts every term of `other` whose short and long names are both unused here.
    pub(crate) fn absorb(&mut self, other: &Glossary) {
        for term in &other.terms {
            if self.by_short.contains_key(&term.short_name)
                || self.by_long.contains_key(&term.long_name)
            {
                continue;
            }
            let idx = self.terms.len();
            self.by_short.insert(term.short_name.clone(), idx);
            self.by_long.insert(term.long_name.clone(), idx);
            self.terms.push(term.clone());
        }
    }
}

impl TryFrom<Vec<GlossaryTerm>> for Glossary {
    type Error = GlossaryError;

    fn try_from(terms: Vec<GlossaryTerm>) -> Result<Self, Self::Error> {
        Self::new(terms)
    }
}

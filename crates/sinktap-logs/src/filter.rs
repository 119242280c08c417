use regex::Regex;

use sinktap_types::{LogDocument, MatchedLine};

use crate::error::FilterError;

/// Compiled match predicates applied to every reassembled document
#[derive(Clone, Default)]
pub struct FilterPipeline {
    /// Exact minion id (if any)
    agent: Option<String>,

    /// Pattern for the source address (if any)
    address: Option<Regex>,

    /// Pattern for each line's text (if any)
    content: Option<Regex>,

    /// Case sensitivity of both patterns
    case_insensitive: bool,
}

impl FilterPipeline {
    /// Create a filter that passes everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a filter from raw option values
    ///
    /// Empty strings count as absent.
    pub fn compile(
        agent: Option<&str>,
        address_pattern: Option<&str>,
        content_pattern: Option<&str>,
        case_insensitive: bool,
    ) -> Result<Self, FilterError> {
        let filter = Self {
            case_insensitive,
            ..Self::default()
        };

        let filter = match agent {
            Some(agent) => filter.with_agent(agent),
            None => filter,
        };
        let filter = match address_pattern {
            Some(pattern) => filter.with_address_pattern(pattern)?,
            None => filter,
        };
        match content_pattern {
            Some(pattern) => filter.with_content_pattern(pattern),
            None => Ok(filter),
        }
    }

    /// Only pass documents from this minion
    pub fn with_agent(mut self, agent: &str) -> Self {
        self.agent = (!agent.is_empty()).then(|| agent.to_string());
        self
    }

    /// Only pass documents whose source address matches
    pub fn with_address_pattern(mut self, pattern: &str) -> Result<Self, FilterError> {
        self.address = self.build_regex("source address", pattern)?;
        Ok(self)
    }

    /// Only emit lines whose text matches
    pub fn with_content_pattern(mut self, pattern: &str) -> Result<Self, FilterError> {
        self.content = self.build_regex("message", pattern)?;
        Ok(self)
    }

    fn build_regex(&self, field: &'static str, pattern: &str) -> Result<Option<Regex>, FilterError> {
        if pattern.is_empty() {
            return Ok(None);
        }

        let expr = if self.case_insensitive {
            // Prepend (?i) for case insensitive matching
            format!("(?i){}", pattern)
        } else {
            pattern.to_string()
        };

        Regex::new(&expr)
            .map(Some)
            .map_err(|source| FilterError::InvalidPattern { field, source })
    }

    /// Check the document-level predicates (agent and source address)
    pub fn accepts_document(&self, document: &LogDocument) -> bool {
        if let Some(agent) = &self.agent {
            if agent != &document.agent_id {
                return false;
            }
        }

        match &self.address {
            Some(re) => re.is_match(&document.source_address),
            None => true,
        }
    }

    /// Check the per-line predicate
    pub fn matches_line(&self, text: &str) -> bool {
        match &self.content {
            Some(re) => re.is_match(text),
            None => true,
        }
    }

    /// Collect the lines of a document that pass every filter, in order
    pub fn evaluate(&self, document: &LogDocument) -> Vec<MatchedLine> {
        if !self.accepts_document(document) {
            return Vec::new();
        }

        document
            .lines
            .iter()
            .filter_map(|line| {
                let text = line.text();
                self.matches_line(&text)
                    .then(|| MatchedLine::new(document, line, text))
            })
            .collect()
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.agent.is_none() && self.address.is_none() && self.content.is_none()
    }

    pub fn address_pattern(&self) -> Option<&str> {
        self.address.as_ref().map(|re| re.as_str())
    }

    pub fn content_pattern(&self) -> Option<&str> {
        self.content.as_ref().map(|re| re.as_str())
    }

    /// Check if filter is case insensitive
    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("agent", &self.agent)
            .field("address", &self.address_pattern())
            .field("content", &self.content_pattern())
            .field("case_insensitive", &self.case_insensitive)
            .finish()
    }
}

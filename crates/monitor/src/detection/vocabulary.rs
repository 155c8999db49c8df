//! Prohibited-item vocabulary
//!
//! Classifier label sets differ between models ("cell phone", "mobile phone",
//! "cellphone"), so labels are matched by case-insensitive substring against
//! every term.

#[derive(Debug, Clone)]
pub struct ProhibitedVocabulary {
    terms: Vec<String>,
}

impl ProhibitedVocabulary {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    /// First vocabulary term contained in `label`
    pub fn matched_term(&self, label: &str) -> Option<&str> {
        let label = label.to_lowercase();
        self.terms
            .iter()
            .find(|term| label.contains(term.as_str()))
            .map(String::as_str)
    }

    pub fn is_prohibited(&self, label: &str) -> bool {
        self.matched_term(label).is_some()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

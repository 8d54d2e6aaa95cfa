use crate::error::ConfigurationError;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Faq {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Deserialize)]
struct FaqFile {
    faqs: Vec<Faq>,
}

/// Canned answers, read once at startup.
#[derive(Debug, Clone)]
pub struct FaqBook {
    faqs: Vec<Faq>,
}

impl FaqBook {
    pub fn new(faqs: Vec<Faq>) -> Self {
        Self { faqs }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let unreadable = |message: String| ConfigurationError::FaqUnreadable {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        let file: FaqFile = serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))?;

        tracing::info!("Loaded {} FAQs from {:?}", file.faqs.len(), path);
        Ok(Self::new(file.faqs))
    }

    pub fn len(&self) -> usize {
        self.faqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faqs.is_empty()
    }

    /// Answer of the first question equal to `message`, ignoring case.
    pub fn answer(&self, message: &str) -> Option<&str> {
        let message = message.to_lowercase();
        self.faqs
            .iter()
            .find(|faq| faq.question.to_lowercase() == message)
            .map(|faq| faq.answer.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn book() -> FaqBook {
        FaqBook::new(vec![
            Faq {
                question: "What is the platform?".into(),
                answer: "A marketplace for brands and influencers.".into(),
            },
            Faq {
                question: "what is the platform?".into(),
                answer: "duplicate".into(),
            },
        ])
    }

    #[test]
    fn test_match_ignores_case() {
        assert_eq!(
            book().answer("WHAT IS THE PLATFORM?"),
            Some("A marketplace for brands and influencers.")
        );
    }

    #[test]
    fn test_match_is_exact() {
        assert_eq!(book().answer("What is the platform"), None);
        assert_eq!(book().answer(" What is the platform?"), None);
        assert_eq!(book().answer(""), None);
    }

    #[test]
    fn test_load_shipped_faqs() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data/faqs.json");
        let book = FaqBook::from_file(&path).unwrap();

        assert!(!book.is_empty());
        assert!(book.answer("how are orders paid?").is_some());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            FaqBook::from_file(Path::new("/nonexistent/faqs.json")),
            Err(ConfigurationError::FaqUnreadable { .. })
        ));
    }
}

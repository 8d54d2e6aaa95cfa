use crate::error::ConfigurationError;
use std::{
    collections::HashSet,
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// Ordered category names of one model export. Position `i` names output
/// score `i`, so the table is tied to a specific model version.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTable {
    version: String,
    labels: Vec<String>,
}

impl LabelTable {
    pub fn new(version: impl Into<String>, labels: Vec<String>) -> Result<Self, ConfigurationError> {
        let version = version.into();
        if labels.is_empty() {
            return Err(ConfigurationError::EmptyLabels(version));
        }

        let mut seen = HashSet::new();
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(ConfigurationError::DuplicateLabel {
                    table: version,
                    label: label.clone(),
                });
            }
        }

        Ok(Self { version, labels })
    }

    /// Reads one label per line. Blank lines and `#` comments are skipped;
    /// everything else keeps its file order.
    pub fn from_file(version: impl Into<String>, filepath: &Path) -> Result<Self, ConfigurationError> {
        let labels = read_label_lines(filepath).map_err(|source| {
            ConfigurationError::LabelsUnreadable {
                path: filepath.to_path_buf(),
                source,
            }
        })?;
        Self::new(version, labels)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn check_output_width(&self, outputs: usize) -> Result<(), ConfigurationError> {
        if outputs != self.labels.len() {
            return Err(ConfigurationError::LabelCountMismatch {
                table: self.version.clone(),
                labels: self.labels.len(),
                outputs,
            });
        }
        Ok(())
    }
}

fn read_label_lines(filepath: &Path) -> io::Result<Vec<String>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let label = line.trim();
        if label.is_empty() || label.starts_with('#') {
            continue;
        }
        labels.push(label.to_string());
    }

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_labels(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "product_classifier_{}_{}.labels",
            name,
            std::process::id()
        ));
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_keeps_file_order() {
        let path = temp_labels("order", "# products v1\nbaby_products\n\nbeauty_health\ngrocery\n");
        let table = LabelTable::from_file("v1", &path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0), Some("baby_products"));
        assert_eq!(table.get(1), Some("beauty_health"));
        assert_eq!(table.get(2), Some("grocery"));
        assert_eq!(table.get(3), None);
        assert_eq!(table.version(), "v1");
    }

    #[test]
    fn test_bundled_product_labels_match_model_width() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("models/efficientnet_b1.labels");
        let table = LabelTable::from_file("efficientnet_b1", &path).unwrap();

        assert!(table.check_output_width(9).is_ok());
        assert_eq!(table.get(0), Some("baby_products"));
        assert_eq!(table.get(8), Some("sports_outdoor"));
    }

    #[test]
    fn test_bundled_coco_labels() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("models/yolov8n.labels");
        let table = LabelTable::from_file("yolov8n", &path).unwrap();

        assert_eq!(table.len(), 80);
        assert_eq!(table.get(0), Some("person"));
    }

    #[test]
    fn test_missing_file() {
        let result = LabelTable::from_file("v1", Path::new("/nonexistent/labels.txt"));
        assert!(matches!(
            result,
            Err(ConfigurationError::LabelsUnreadable { .. })
        ));
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(matches!(
            LabelTable::new("v1", vec![]),
            Err(ConfigurationError::EmptyLabels(_))
        ));
        assert!(matches!(
            LabelTable::new("v1", vec!["a".into(), "b".into(), "a".into()]),
            Err(ConfigurationError::DuplicateLabel { .. })
        ));
    }

    #[test]
    fn test_output_width_mismatch() {
        let table = LabelTable::new("v1", vec!["a".into(), "b".into()]).unwrap();
        assert!(matches!(
            table.check_output_width(3),
            Err(ConfigurationError::LabelCountMismatch {
                labels: 2,
                outputs: 3,
                ..
            })
        ));
    }
}

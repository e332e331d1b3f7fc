//! Operation classifier - decides which operations need a vote.

use tracing::debug;

use crate::config::ClassifierConfig;
use crate::types::Classification;

/// Classifies operation descriptors as critical or normal.
///
/// Stateless and deterministic: the same descriptor always yields the
/// same classification. Matching is naive substring containment
/// against the configured command patterns and sensitive paths.
pub struct OperationClassifier {
    config: ClassifierConfig,
}

impl OperationClassifier {
    /// Create a classifier with the default policy lists.
    pub fn new() -> Self {
        Self::with_config(ClassifierConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Classify a free-form descriptor (shell command or path).
    pub fn classify(&self, descriptor: &str) -> Classification {
        if let Some(pattern) = self.matched_pattern(descriptor) {
            debug!(descriptor = %descriptor, pattern = %pattern, "Descriptor classified critical");
            return Classification::Critical;
        }

        Classification::Normal
    }

    /// The first policy entry the descriptor matches, if any.
    pub fn matched_pattern(&self, descriptor: &str) -> Option<&str> {
        self.config
            .command_patterns
            .iter()
            .chain(self.config.sensitive_paths.iter())
            .find(|pattern| descriptor.contains(pattern.as_str()))
            .map(|s| s.as_str())
    }
}

impl Default for OperationClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_commands() {
        let classifier = OperationClassifier::new();

        assert_eq!(
            classifier.classify("sudo apt install vlc"),
            Classification::Critical
        );
        assert_eq!(
            classifier.classify("sudo rm -rf /etc"),
            Classification::Critical
        );
        assert_eq!(
            classifier.classify("dd if=/dev/zero of=/dev/sda"),
            Classification::Critical
        );
    }

    #[test]
    fn test_sensitive_paths() {
        let classifier = OperationClassifier::new();

        assert_eq!(
            classifier.classify("/etc/passwd"),
            Classification::Critical
        );
        assert_eq!(
            classifier.classify("cat /home/user/.ssh/id_rsa"),
            Classification::Critical
        );
        assert_eq!(classifier.classify("/boot/vmlinuz"), Classification::Critical);
    }

    #[test]
    fn test_normal_operations() {
        let classifier = OperationClassifier::new();

        assert_eq!(classifier.classify("ls -la"), Classification::Normal);
        assert_eq!(classifier.classify("mkdir ~/notes"), Classification::Normal);
        assert_eq!(
            classifier.classify("cat /home/user/document.txt"),
            Classification::Normal
        );
    }

    #[test]
    fn test_determinism() {
        let classifier = OperationClassifier::new();

        for descriptor in ["sudo apt update", "ls -la", "/etc/shadow", ""] {
            assert_eq!(
                classifier.classify(descriptor),
                classifier.classify(descriptor)
            );
        }
    }

    #[test]
    fn test_substring_false_positive_preserved() {
        let classifier = OperationClassifier::new();

        // Naive substring matching misclassifies benign descriptors
        // containing a listed token. Behavior preserved as-observed.
        assert_eq!(
            classifier.classify("echo \"mount your bike\""),
            Classification::Critical
        );
    }

    #[test]
    fn test_custom_policy() {
        let config = ClassifierConfig {
            command_patterns: vec!["shutdown".to_string()],
            sensitive_paths: vec!["/opt/secrets/".to_string()],
        };
        let classifier = OperationClassifier::with_config(config);

        assert_eq!(classifier.classify("shutdown -h now"), Classification::Critical);
        assert_eq!(classifier.classify("sudo ls"), Classification::Normal);
        assert_eq!(
            classifier.classify("cp /opt/secrets/key.pem /tmp"),
            Classification::Critical
        );
    }
}

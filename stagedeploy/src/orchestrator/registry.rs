//! Ordered, immutable list of stages.

use crate::errors::{DeployError, Result};
use crate::stages::Stage;
use std::collections::HashSet;
use std::sync::Arc;

/// Stages indexed `1..=N`.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: Vec<Arc<dyn Stage>>,
}

impl StageRegistry {
    /// Builds a registry.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Registry`] if `stages` is empty or two stages
    /// share a name.
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Result<Self> {
        if stages.is_empty() {
            return Err(DeployError::Registry("at least one stage is required".to_string()));
        }
        let mut seen = HashSet::new();
        for stage in &stages {
            if !seen.insert(stage.name()) {
                return Err(DeployError::Registry(format!(
                    "duplicate stage name '{}'",
                    stage.name()
                )));
            }
        }
        Ok(Self { stages })
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false; registries are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage at one-based `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arc<dyn Stage>> {
        index.checked_sub(1).and_then(|i| self.stages.get(i))
    }

    /// Stages with their one-based indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<dyn Stage>)> {
        self.stages.iter().enumerate().map(|(i, s)| (i + 1, s))
    }

    /// `(index, name)` pairs, for listings.
    #[must_use]
    pub fn names(&self) -> Vec<(usize, String)> {
        self.iter().map(|(i, s)| (i, s.name().to_string())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingStage, StageLog};

    fn stage(name: &str) -> Arc<dyn Stage> {
        Arc::new(RecordingStage::new(name, StageLog::new()))
    }

    #[test]
    fn test_indices_are_one_based() {
        let registry = StageRegistry::new(vec![stage("a"), stage("b")]).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1).unwrap().name(), "a");
        assert!(registry.get(0).is_none());
        assert!(registry.get(3).is_none());
        assert_eq!(
            registry.names(),
            vec![(1, "a".to_string()), (2, "b".to_string())]
        );
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(matches!(StageRegistry::new(vec![]), Err(DeployError::Registry(_))));
        assert!(matches!(
            StageRegistry::new(vec![stage("a"), stage("a")]),
            Err(DeployError::Registry(msg)) if msg.contains("'a'")
        ));
    }
}

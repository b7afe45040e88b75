//! Names of the resources a deployment owns.

use crate::config::{expand, Configuration, NamespaceSettings};

/// Every resource name derived from one deployment identifier.
///
/// Conflict detection and cleanup both scan exactly this namespace, so
/// what the one reports is what the other removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNamespace {
    /// The deployment identifier itself (also the stack name).
    pub identifier: String,
    /// Parameters looked up individually.
    pub critical_parameters: Vec<String>,
    /// Parameter path prefixes listed recursively.
    pub parameter_prefixes: Vec<String>,
    /// Buckets created by the deployment.
    pub buckets: Vec<String>,
}

impl ResourceNamespace {
    /// Expands the namespace templates for a configuration.
    #[must_use]
    pub fn new(settings: &NamespaceSettings, config: &Configuration) -> Self {
        let expand_all = |templates: &[String]| -> Vec<String> {
            let mut out: Vec<String> = Vec::with_capacity(templates.len());
            for template in templates {
                let value = expand(template, config);
                if !out.contains(&value) {
                    out.push(value);
                }
            }
            out
        };

        Self {
            identifier: config.name.clone(),
            critical_parameters: expand_all(&settings.critical_parameters),
            parameter_prefixes: expand_all(&settings.parameter_prefixes),
            buckets: expand_all(&settings.buckets),
        }
    }

    /// Namespace with the default templates.
    #[must_use]
    pub fn for_configuration(config: &Configuration) -> Self {
        Self::new(&NamespaceSettings::default(), config)
    }

    /// Returns true if a stack or bucket name belongs to this deployment.
    #[must_use]
    pub fn owns(&self, resource_name: &str) -> bool {
        resource_name.contains(&self.identifier)
    }

    /// The artifacts bucket, if the namespace names one.
    #[must_use]
    pub fn artifact_bucket(&self) -> Option<&str> {
        self.buckets
            .iter()
            .find(|b| b.ends_with("-artifacts"))
            .or_else(|| self.buckets.first())
            .map(String::as_str)
    }

    /// Full path of a parameter under the first prefix.
    #[must_use]
    pub fn parameter(&self, relative: &str) -> String {
        let prefix = self
            .parameter_prefixes
            .first()
            .map_or_else(|| format!("/{}/", self.identifier), Clone::clone);
        format!("{}{}", prefix, relative.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_namespace() {
        let ns = ResourceNamespace::for_configuration(&Configuration::new("demo-a1b2c3"));

        assert_eq!(
            ns.critical_parameters,
            vec![
                "/demo-a1b2c3/config/agent-id".to_string(),
                "/demo-a1b2c3/config/service-role-arn".to_string(),
                "/demo-a1b2c3/config/artifact-bucket".to_string(),
            ]
        );
        assert_eq!(ns.parameter_prefixes, vec!["/demo-a1b2c3/".to_string()]);
        assert_eq!(ns.artifact_bucket(), Some("demo-a1b2c3-artifacts"));
        assert_eq!(ns.parameter("config/region"), "/demo-a1b2c3/config/region");
    }

    #[test]
    fn test_duplicate_templates_collapse() {
        let settings = NamespaceSettings {
            critical_parameters: vec![],
            parameter_prefixes: vec!["/{name}/".to_string(), "/{name}/".to_string()],
            buckets: vec!["{name}-data".to_string()],
        };
        let ns = ResourceNamespace::new(&settings, &Configuration::new("demo"));

        assert_eq!(ns.parameter_prefixes.len(), 1);
        assert_eq!(ns.artifact_bucket(), Some("demo-data"));
    }

    #[test]
    fn test_owns() {
        let ns = ResourceNamespace::for_configuration(&Configuration::new("demo"));
        assert!(ns.owns("demo-artifacts"));
        assert!(ns.owns("demo"));
        assert!(!ns.owns("other-stack"));
    }
}

//! Structural checks run on a delivery config before anything is written.

use crate::core::{Constraint, DeliveryConfig};
use crate::errors::ValidationError;
use std::collections::BTreeMap;

/// Checks environment names, resource ids and artifact references are
/// unique, and that every depends-on constraint names a real environment.
pub fn validate(config: &DeliveryConfig) -> Result<(), ValidationError> {
    let names = duplicates(config.environments.iter().map(|e| e.name.as_str()));
    if !names.is_empty() {
        return Err(ValidationError::DuplicateEnvironmentName { names });
    }

    let ids = duplicates(config.resources().map(|r| r.id.as_str()));
    if !ids.is_empty() {
        let by_environment = config
            .environments
            .iter()
            .filter_map(|env| {
                let found: Vec<String> = env
                    .resources
                    .iter()
                    .filter(|r| ids.contains(&r.id))
                    .map(|r| r.id.clone())
                    .collect();
                (!found.is_empty()).then(|| (env.name.clone(), found))
            })
            .collect();
        tracing::error!(delivery_config = %config.name, duplicates = ?ids, "Duplicate resource ids");
        return Err(ValidationError::DuplicateResourceId {
            duplicates: ids,
            by_environment,
        });
    }

    let references = duplicates(config.artifacts.iter().map(|a| a.reference.as_str()));
    if !references.is_empty() {
        return Err(ValidationError::DuplicateArtifactReference { references });
    }

    for environment in &config.environments {
        for constraint in &environment.constraints {
            if let Constraint::DependsOn { environment: required } = constraint {
                if config.environment(required).is_none() {
                    return Err(ValidationError::MissingEnvironmentReference {
                        environment: environment.name.clone(),
                        missing: required.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn duplicates<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for item in items {
        *counts.entry(item).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(item, _)| item.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Environment;
    use crate::testing::fixtures;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fixture_config_is_valid() {
        assert_eq!(validate(&fixtures::delivery_config()), Ok(()));
    }

    #[test]
    fn test_duplicate_resource_ids_are_grouped_by_environment() {
        let mut config = fixtures::delivery_config();
        let duplicate = fixtures::resource("test");
        config.environments[1].resources.push(duplicate.clone());

        let Err(ValidationError::DuplicateResourceId {
            duplicates,
            by_environment,
        }) = validate(&config)
        else {
            panic!("expected duplicate resource error");
        };
        assert_eq!(duplicates, vec![duplicate.id.clone()]);
        assert_eq!(by_environment.len(), 2);
        assert_eq!(by_environment["staging"], vec![duplicate.id]);
    }

    #[test]
    fn test_duplicate_environment_names_are_checked_first() {
        let mut config = fixtures::delivery_config();
        config.environments.push(Environment::new("test").with_resource(fixtures::resource("test")));
        assert!(matches!(
            validate(&config),
            Err(ValidationError::DuplicateEnvironmentName { names }) if names == vec!["test"]
        ));
    }

    #[test]
    fn test_duplicate_artifact_references() {
        let mut config = fixtures::delivery_config();
        config.artifacts.push(fixtures::keeldemo_deb());
        assert!(matches!(
            validate(&config),
            Err(ValidationError::DuplicateArtifactReference { .. })
        ));
    }

    #[test]
    fn test_depends_on_unknown_environment() {
        let mut config = fixtures::delivery_config();
        config.environments.retain(|e| e.name != "staging");
        assert_eq!(
            validate(&config),
            Err(ValidationError::MissingEnvironmentReference {
                environment: "production".to_string(),
                missing: "staging".to_string(),
            })
        );
    }
}

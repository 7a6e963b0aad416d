use crate::model::registry::ModelRegistry;
use crate::validation::{ValidationError, ValidationResult};

/// Fails when a relation, component or dynamic-zone attribute points at a
/// model that is not registered.
pub fn check_relation_targets(registry: &ModelRegistry) -> ValidationResult<()> {
    for model in registry.iter() {
        for (attribute, spec) in &model.attributes {
            for (target, plugin) in spec.kind.targets() {
                if registry.resolve(target, plugin).is_none() {
                    return Err(ValidationError::UnresolvedTarget {
                        uid: model.uid.clone(),
                        attribute: attribute.clone(),
                        target: match plugin {
                            Some(plugin) => format!("{plugin}::{target}"),
                            None => target.to_string(),
                        },
                    });
                }
            }
        }
    }
    Ok(())
}

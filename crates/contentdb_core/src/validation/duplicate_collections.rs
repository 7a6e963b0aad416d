use crate::model::descriptor::ModelDescriptor;
use crate::model::registry::ModelRegistry;
use crate::validation::{ConflictSide, ValidationError, ValidationResult};
use std::collections::HashMap;

/// Fails on the first pair of distinct models sharing a collection name.
///
/// Single hashed pass in uid order; the earlier model is reported first.
pub fn check_duplicate_collection_names(registry: &ModelRegistry) -> ValidationResult<()> {
    let mut seen: HashMap<&str, &ModelDescriptor> = HashMap::with_capacity(registry.len());
    for model in registry.iter() {
        match seen.get(model.collection_name.as_str()) {
            Some(first) if first.uid != model.uid => {
                return Err(ValidationError::DuplicateCollectionName {
                    collection: model.collection_name.clone(),
                    first: side(first),
                    second: side(model),
                });
            }
            Some(_) => {}
            None => {
                seen.insert(model.collection_name.as_str(), model);
            }
        }
    }
    Ok(())
}

fn side(model: &ModelDescriptor) -> ConflictSide {
    ConflictSide {
        uid: model.uid.clone(),
        provenance: model.provenance(),
    }
}

#[cfg(test)]
mod tests {
    use super::check_duplicate_collection_names;
    use crate::model::descriptor::ModelDeclaration;
    use crate::model::registry::ModelRegistry;
    use crate::model::sources::ModelSources;
    use crate::validation::ValidationError;

    #[test]
    fn reports_both_sides_of_a_conflict() {
        let sources = ModelSources::new()
            .with_api_model("dog", "dog", ModelDeclaration::new().with_collection_name("animals"))
            .with_api_model("cat", "cat", ModelDeclaration::new())
            .with_plugin_model(
                "shelter",
                "pet",
                ModelDeclaration::new().with_collection_name("animals"),
            );
        let registry = ModelRegistry::from_sources(&sources).expect("registry");

        let err = check_duplicate_collection_names(&registry).expect_err("conflict");
        let ValidationError::DuplicateCollectionName {
            collection,
            first,
            second,
        } = &err
        else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(collection, "animals");
        assert_eq!(first.uid, "application::dog.dog");
        assert_eq!(second.uid, "plugins::shelter.pet");
        assert_eq!(
            err.to_string(),
            "Duplicated collection name: `animals`.\n\
             The same collection name can't be used for two different models.\n\
             First found in API `dog`, model `dog`.\n\
             Second found in Plugin `shelter`, model `pet`."
        );
    }

    #[test]
    fn finds_non_adjacent_conflicts() {
        let mut sources = ModelSources::new();
        for name in ["a", "b", "c", "d"] {
            sources = sources.with_api_model(name, name, ModelDeclaration::new());
        }
        let sources = sources.with_admin_model("role", ModelDeclaration::new().with_collection_name("a"));
        let registry = ModelRegistry::from_sources(&sources).expect("registry");
        let err = check_duplicate_collection_names(&registry).expect_err("conflict");
        assert!(err.to_string().contains("Admin internal `admin`, model `role`"));
    }

    #[test]
    fn collection_names_are_compared_exactly() {
        let sources = ModelSources::new()
            .with_api_model("dog", "dog", ModelDeclaration::new().with_collection_name("Dogs"))
            .with_api_model("cat", "cat", ModelDeclaration::new().with_collection_name("dogs"));
        let registry = ModelRegistry::from_sources(&sources).expect("registry");
        check_duplicate_collection_names(&registry).expect("distinct collections");
    }
}

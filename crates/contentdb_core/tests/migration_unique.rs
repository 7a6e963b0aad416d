mod common;

use common::{all, edit_dog, pets, string, values, SqliteFixture};
use contentdb_core::migration::MigrationError;
use contentdb_core::{ManagerError, MigrationState, MigrationStep, ModelSources, QueryError};
use serde_json::json;

fn coded() -> ModelSources {
    edit_dog(pets(), |dog| {
        dog.attributes.insert("code".into(), string().unique());
    })
}

#[tokio::test]
async fn unique_survives_an_unrelated_migration() {
    let fixture = SqliteFixture::new();
    let mut manager = fixture.start(coded()).await;
    manager
        .query("dog", None)
        .unwrap()
        .create(values(json!({ "code": "a" })))
        .await
        .unwrap();
    manager.destroy().await;

    let with_color = edit_dog(coded(), |dog| {
        dog.attributes.insert("color".into(), string());
    });
    let manager = fixture.start(with_color).await;
    assert_eq!(
        manager.migration_report().steps("application::dog.dog"),
        &[MigrationStep::AddAttribute {
            name: "color".into(),
            default: None
        }]
    );

    let dogs = manager.query("dog", None).unwrap();
    let err = dogs
        .create(values(json!({ "code": "a", "color": "brown" })))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::UniqueViolation { ref attribute, .. } if attribute == "code"));
    dogs.create(values(json!({ "code": "b" }))).await.unwrap();
}

#[tokio::test]
async fn rerun_without_delta_changes_nothing() {
    let fixture = SqliteFixture::new();
    let mut manager = fixture.start(coded()).await;
    assert!(manager.migration_report().structural_changes() > 0);
    manager.destroy().await;

    for _ in 0..2 {
        let mut manager = fixture.start(coded()).await;
        let report = manager.migration_report();
        assert_eq!(report.structural_changes(), 0);
        assert_eq!(report.state("application::dog.dog"), Some(MigrationState::Migrated));
        assert!(report.steps("application::dog.dog").is_empty());
        manager.destroy().await;
    }
}

#[tokio::test]
async fn enabling_unique_over_duplicates_fails_and_keeps_rows() {
    let fixture = SqliteFixture::new();
    let mut manager = fixture.start(pets()).await;
    let dogs = manager.query("dog", None).unwrap();
    for name in ["Rex", "Rex", "Atos"] {
        dogs.create(values(json!({ "name": name }))).await.unwrap();
    }
    manager.destroy().await;

    let unique_names = edit_dog(pets(), |dog| {
        if let Some(name) = dog.attributes.get_mut("name") {
            name.unique = true;
        }
    });
    let err = fixture.manager(unique_names).initialize().await.unwrap_err();
    assert!(matches!(
        err,
        ManagerError::Migration(MigrationError::UniqueAttributeHasDuplicates { duplicates: 1, .. })
    ));
    assert_eq!(fixture.bodies("dog").len(), 3);
}

#[tokio::test]
async fn renamed_collection_keeps_rows_and_unique_values() {
    let fixture = SqliteFixture::new();
    let mut manager = fixture.start(coded()).await;
    manager
        .query("dog", None)
        .unwrap()
        .create(values(json!({ "name": "Nelson", "code": "n" })))
        .await
        .unwrap();
    manager.destroy().await;

    let renamed = edit_dog(coded(), |dog| dog.collection_name = Some("hounds".into()));
    let manager = fixture.start(renamed).await;
    assert_eq!(
        manager.migration_report().steps("application::dog.dog"),
        &[MigrationStep::RenameCollection { from: "dog".into() }]
    );
    assert!(fixture.bodies("dog").is_empty());

    let dogs = manager.query("dog", None).unwrap();
    assert_eq!(all(&dogs).await[0]["name"], json!("Nelson"));
    assert!(dogs
        .create(values(json!({ "code": "n" })))
        .await
        .unwrap_err()
        .is_validation());
}

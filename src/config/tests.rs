use super::*;
use crate::corpus::CorpusKind;
use crate::database::DistanceMetric;
use std::fs;
use tempfile::TempDir;

const USER_CONFIG: &str = r#"
[ollama]
host = "gpu-box"
port = 11500
embedding_model = "mxbai-embed-large"
generation_model = "llama3.1:8b"
embedding_dimension = 1024

[generation]
temperature = 0.0
fallback_phrase = "The passages do not say."

[retrieval]
top_k = 8
distance = "dot"
max_distance = 0.45

[corpus]
bible_csv = "/srv/corpora/DRC.csv"
catechism_collection = "compendium"
"#;

#[test]
fn user_config_file_loads() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    fs::write(temp_dir.path().join("config.toml"), USER_CONFIG)
        .expect("should write config.toml successfully");

    let config = Config::load(temp_dir.path()).expect("config should load");

    assert_eq!(config.ollama.host, "gpu-box");
    assert_eq!(config.ollama.embedding_dimension, 1024);
    assert_eq!(config.ollama.protocol, "http");
    assert!(config.generation.temperature.abs() < f32::EPSILON);
    assert_eq!(config.generation.retry_attempts, 1);
    assert_eq!(config.retrieval.distance, DistanceMetric::Dot);
    assert_eq!(config.retrieval.max_distance, Some(0.45));
    assert_eq!(config.indexing, IndexingConfig::default());
    assert_eq!(config.collection_name(CorpusKind::Bible), "drb_verses");
    assert_eq!(config.collection_name(CorpusKind::Catechism), "compendium");
    assert_eq!(config.get_base_dir(), temp_dir.path());
}

#[test]
fn unknown_distance_metric_rejected() {
    let toml_str = r#"
        [ollama]

        [retrieval]
        distance = "manhattan"
    "#;

    let result: Result<Config, toml::de::Error> = toml::from_str(toml_str);
    assert!(result.is_err());
}

#[test]
fn unset_max_distance_is_not_written() {
    let config = Config::default();
    let toml_content =
        toml::to_string_pretty(&config).expect("config should convert to toml string");

    assert!(!toml_content.contains("max_distance"));
    assert!(toml_content.contains("distance = \"cosine\""));
}

#[test]
fn storage_lives_under_base_dir() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    let base_dir =
        resolve_base_dir(Some(temp_dir.path().to_path_buf())).expect("override resolves");
    let config = Config::load(&base_dir).expect("defaults load");

    assert_eq!(config.vector_database_path(), base_dir.join("vectors"));
    assert_eq!(config.config_file_path(), base_dir.join("config.toml"));
}

#[test]
fn invalid_collection_in_file_is_rejected() {
    let temp_dir = TempDir::new().expect("should create TempDir successfully");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[ollama]\n\n[corpus]\nbible_collection = \"drb verses\"\n",
    )
    .expect("should write config.toml successfully");

    let result = Config::load(temp_dir.path());
    assert!(result.is_err());
}

#[test]
fn error_messages_name_the_value() {
    let cases = vec![
        (ConfigError::InvalidProtocol("ftp".to_string()), "ftp"),
        (ConfigError::InvalidBatchSize(6000), "6000"),
        (ConfigError::InvalidTopK(0), "top_k"),
        (
            ConfigError::InvalidCollectionName("drb verses".to_string()),
            "drb verses",
        ),
        (
            ConfigError::MissingCorpusFile("data/DRC.csv".into()),
            "data/DRC.csv",
        ),
    ];

    for (error, fragment) in cases {
        let message = error.to_string();
        assert!(
            message.contains(fragment),
            "{message:?} should mention {fragment:?}"
        );
    }
}

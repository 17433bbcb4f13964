use super::*;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.embedding_model, "nomic-embed-text:latest");
    assert_eq!(config.ollama.embedding_dimension, 768);
    assert_eq!(config.retrieval.top_k, 5);
    assert_eq!(config.retrieval.distance, DistanceMetric::Cosine);
    assert_eq!(config.generation.retry_attempts, 1);
    assert!(config.generation.temperature < 0.5);
    assert_eq!(config.corpus.bible_collection, "drb_verses");
    assert_eq!(config.corpus.catechism_collection, "ccc_qna");
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.embedding_model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.indexing.batch_size = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.indexing.batch_size = MAX_UPSERT_BATCH + 1;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.indexing.concurrency = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.generation.fallback_phrase = "   ".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.retrieval.max_distance = Some(-0.5);
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.corpus.bible_collection = "bad name/with slash".to_string();
    assert!(invalid_config.validate().is_err());
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_fills_defaults() {
    let toml_str = r#"
        [ollama]
        host = "gpu-box"

        [retrieval]
        top_k = 8
        distance = "l2"
    "#;

    let config: Config = toml::from_str(toml_str).expect("should parse partial toml");
    assert_eq!(config.ollama.host, "gpu-box");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.retrieval.top_k, 8);
    assert_eq!(config.retrieval.distance, DistanceMetric::L2);
    assert_eq!(config.indexing, IndexingConfig::default());
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_host("example.com".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_embedding_model("mxbai-embed-large".to_string()).is_ok());
    assert!(config.set_generation_model("llama3.1:8b".to_string()).is_ok());
    assert!(config.set_embedding_dimension(1024).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_embedding_model(String::new()).is_err());
    assert!(config.set_generation_model("  ".to_string()).is_err());
    assert!(config.set_embedding_dimension(1).is_err());

    let mut indexing = IndexingConfig::default();
    assert!(indexing.set_batch_size(200).is_ok());
    assert!(indexing.set_batch_size(0).is_err());
    assert!(indexing.set_concurrency(8).is_ok());
    assert!(indexing.set_concurrency(65).is_err());

    let mut generation = GenerationConfig::default();
    assert!(generation.set_temperature(0.0).is_ok());
    assert!(generation.set_temperature(3.0).is_err());

    let mut retrieval = RetrievalConfig::default();
    assert!(retrieval.set_top_k(10).is_ok());
    assert!(retrieval.set_top_k(0).is_err());
}

#[test]
fn load_missing_file_uses_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.ollama, OllamaConfig::default());
    assert_eq!(config.vector_database_path(), temp_dir.path().join("vectors"));
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.retrieval.max_distance = Some(0.6);
    config.corpus.catechism_collection = "compendium".to_string();

    config.save().expect("should save config");
    assert!(config.config_file_path().exists());

    let loaded = Config::load(temp_dir.path()).expect("should load saved config");
    assert_eq!(loaded, config);
    assert_eq!(loaded.collection_name(CorpusKind::Catechism), "compendium");
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(
        temp_dir.path().join("config.toml"),
        "[ollama]\nport = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn require_corpus_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::default();

    let missing = temp_dir.path().join("missing.csv");
    let err = config
        .require_corpus_file(CorpusKind::Bible, Some(&missing))
        .expect_err("missing file should be a config error");
    assert!(matches!(err, ConfigError::MissingCorpusFile(path) if path == missing));

    let present = temp_dir.path().join("DRC.csv");
    std::fs::write(&present, "Book,Chapter,Verse,Text\n").expect("should write csv");
    let resolved = config
        .require_corpus_file(CorpusKind::Bible, Some(&present))
        .expect("present file resolves");
    assert_eq!(resolved, present);
}

#[test]
fn collection_name_rules() {
    assert!(validate_collection_name("drb_verses").is_ok());
    assert!(validate_collection_name("ccc-qna.v2").is_ok());
    assert!(validate_collection_name("").is_err());
    assert!(validate_collection_name("has space").is_err());
    assert!(validate_collection_name("quote'd").is_err());
}

// Configuration management module
// TOML settings under the base directory plus the interactive editor

pub mod interactive;
pub mod settings;

#[cfg(test)]
mod tests;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, CorpusConfig, GenerationConfig, IndexingConfig, OllamaConfig,
    RetrievalConfig,
};

/// Resolve the base directory, preferring an explicit override
#[inline]
pub fn resolve_base_dir(
    override_dir: Option<std::path::PathBuf>,
) -> Result<std::path::PathBuf, ConfigError> {
    override_dir.map_or_else(Config::default_base_dir, Ok)
}


use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::{Path, PathBuf};

use super::{Config, ConfigError, EnrichmentConfig, OllamaConfig, ReembedStrategy};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Notes Index Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("Notes Directory").bold().yellow());
    config.notes_dir = prompt_notes_dir(&config.notes_dir)?;
    eprintln!();

    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure your local Ollama instance for embedding generation.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Context Enrichment").bold().yellow());
    eprintln!("Optionally ask a language model to describe where each chunk sits in its note.");
    eprintln!();

    configure_enrichment(&mut config.enrichment)?;

    let strategies = &[ReembedStrategy::Full, ReembedStrategy::ReuseUnchanged];
    let default_index = strategies
        .iter()
        .position(|&s| s == config.indexer.reembed_strategy)
        .unwrap_or(0);
    let strategy_index = Select::new()
        .with_prompt("Re-embed strategy for changed notes")
        .default(default_index)
        .items(strategies)
        .interact()?;
    config.indexer.reembed_strategy = strategies
        .get(strategy_index)
        .copied()
        .unwrap_or_default();

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama) {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before indexing.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!(
        "Notes directory: {}",
        style(config.notes_dir.display()).cyan()
    );
    eprintln!("Index database: {}", style(config.database_path().display()).cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    match config.ollama_url() {
        Ok(url) => eprintln!("  URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(&config.ollama.model).cyan());
    eprintln!(
        "  Dimensions: {}",
        style(config.ollama.embedding_dimension).cyan()
    );
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());

    eprintln!();
    eprintln!("{}", style("Chunking:").bold().yellow());
    eprintln!(
        "  Max chunk size: {} characters",
        style(config.chunking.max_chunk_size).cyan()
    );
    eprintln!(
        "  Window overlap: {} characters",
        style(config.chunking.overlap_size).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Enrichment:").bold().yellow());
    if config.enrichment.enabled {
        eprintln!("  Model: {}", style(&config.enrichment.model).cyan());
    } else {
        eprintln!("  {}", style("Disabled").dim());
    }

    eprintln!();
    eprintln!("{}", style("Indexer:").bold().yellow());
    eprintln!(
        "  Extension: .{}",
        style(config.indexer.normalized_extension()).cyan()
    );
    eprintln!(
        "  Embedding version: {}",
        style(config.indexer.embedding_version).cyan()
    );
    eprintln!(
        "  Scan interval: {}s",
        style(config.indexer.scan_interval_secs).cyan()
    );
    eprintln!(
        "  Re-embed strategy: {}",
        style(config.indexer.reembed_strategy).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    Config::load(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("Existing configuration is invalid. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            })
        },
        |config| {
            if config.config_file_path().exists() {
                eprintln!("{}", style("Found existing configuration.").green());
            }
            Ok(config)
        },
    )
}

fn prompt_notes_dir(current: &Path) -> Result<PathBuf> {
    let notes_dir: String = Input::new()
        .with_prompt("Directory of markdown notes to index")
        .default(current.display().to_string())
        .validate_with(|input: &String| validate_notes_dir(input))
        .interact_text()?;

    Ok(PathBuf::from(notes_dir.trim()))
}

fn validate_notes_dir(input: &str) -> Result<(), String> {
    let path = Path::new(input.trim());
    if input.trim().is_empty() {
        Err("Notes directory cannot be empty".to_string())
    } else if path.exists() && !path.is_dir() {
        Err(format!("{} is not a directory", path.display()))
    } else {
        Ok(())
    }
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols
        .get(protocol_index)
        .copied()
        .unwrap_or("http")
        .to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let candidate = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            candidate.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let embedding_dimension: u32 = Input::new()
        .with_prompt("Embedding dimensions produced by the model")
        .default(ollama.embedding_dimension)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if (1..=8192).contains(input) {
                Ok(())
            } else {
                Err("Dimensions must be between 1 and 8192")
            }
        })
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(ollama.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_embedding_dimension(embedding_dimension)?;
    ollama.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_enrichment(enrichment: &mut EnrichmentConfig) -> Result<()> {
    enrichment.enabled = Confirm::new()
        .with_prompt("Generate context for each chunk before embedding?")
        .default(enrichment.enabled)
        .interact()?;

    if enrichment.enabled {
        enrichment.model = Input::new()
            .with_prompt("Generation model")
            .default(enrichment.model.clone())
            .validate_with(|input: &String| -> Result<(), &str> {
                if input.trim().is_empty() {
                    Err("Model name cannot be empty")
                } else {
                    Ok(())
                }
            })
            .interact_text()?;
    }

    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> bool {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => true,
        Err(ureq::Error::StatusCode(code)) => (400..500).contains(&code),
        Err(_) => false,
    }
}

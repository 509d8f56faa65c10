//! List models command

use std::path::Path;

use anyhow::Result;

use crate::loader::{
    default_model_dir, detect_model_source, get_gguf_info, list_available, AvailableModel,
    ModelFormat,
};

/// List available models
pub async fn list(verbose: bool) -> Result<()> {
    let model_dir = default_model_dir();

    if !model_dir.exists() {
        println!("No models directory found at: {}", model_dir.display());
        println!("\nSet LLMHOST_MODEL_DIR or create {}.", model_dir.display());
        return Ok(());
    }

    println!("Models in {}:\n", model_dir.display());

    let models = list_available(&model_dir)?;
    if models.is_empty() {
        println!("  No models found.");
        println!("\nTo add models:");
        println!(
            "  - Place GGUF files (or SafeTensors directories) in {}",
            model_dir.display()
        );
        return Ok(());
    }

    for model in &models {
        if verbose {
            print_model_details(model);
        } else {
            println!("  {} ({})", model.name, model.format.as_str());
        }
    }

    Ok(())
}

fn print_model_details(model: &AvailableModel) {
    println!("  {}", model.name);
    println!("    Path: {}", model.path.display());
    println!("    Format: {}", model.format.as_str());

    if model.format == ModelFormat::Gguf {
        print_gguf_summary(&model.path);
    }

    println!("    Size: {}", format_size(model.size_bytes));
    println!();
}

fn print_gguf_summary(path: &Path) {
    let Some(info) = detect_model_source(path)
        .ok()
        .and_then(|source| get_gguf_info(&source.weights_path).ok())
    else {
        return;
    };
    println!("    Architecture: {}", info.architecture());
    if let Some(layers) = info.arch_u64("block_count") {
        println!("    Layers: {}", layers);
    }
    if let Some(ctx) = info.arch_u64("context_length") {
        println!("    Max context: {}", ctx);
    }
}

/// Human-readable byte size
pub(crate) fn format_size(bytes: u64) -> String {
    let size_mb = bytes as f64 / (1024.0 * 1024.0);
    if size_mb > 1024.0 {
        format!("{:.2} GB", size_mb / 1024.0)
    } else {
        format!("{:.2} MB", size_mb)
    }
}

//! Model info command

use std::path::PathBuf;

use anyhow::Result;

use super::list::format_size;
use crate::config::{discover_settings_file, SettingsLayers};
use crate::engine::{estimate_footprint, LoadRequest, Planner};
use crate::loader::{default_model_dir, detect_model_source, find_model_path};
use crate::model::{model_name_from_arg, MetadataSource};

/// Show model metadata and the plan the fitter would produce
pub async fn info(model: String, settings: Option<PathBuf>) -> Result<()> {
    let model_dir = default_model_dir();
    let name = model_name_from_arg(&model);

    println!("Model: {}\n", name);
    match find_model_path(&model_dir, &name).and_then(detect_model_source) {
        Ok(source) => {
            println!("Path: {}", source.weights_path.display());
            println!("Format: {}", source.format.as_str());
        }
        Err(e) => println!("Weights: {}", e),
    }

    let root = PathBuf::from(".");
    let source = discover_settings_file(settings.as_deref(), &root);
    let layers = SettingsLayers::load(Default::default(), source)?;
    let metadata = MetadataSource::load(&model_dir)?;

    let model_metadata = metadata.lookup(&name);
    if !model_metadata.settings.is_empty() {
        println!("\nMetadata:");
        for (key, value) in &model_metadata.settings {
            println!("  {}: {}", key, value);
        }
    }

    let planner = Planner::new(layers, metadata);
    let planned = planner.plan(&LoadRequest::new(name))?;
    let plan = &planned.plan;

    println!("\nLoad plan:");
    println!("  Loader: {}", plan.loader);
    println!("  Context size: {}", plan.context_size);
    println!("  Cache type: {}", plan.cache_type);
    println!("  GPU layers: {}", plan.offload_layers);
    match plan.declared_vram_budget {
        Some(budget) => println!("  VRAM budget: {}", format_size(budget)),
        None => println!("  VRAM budget: not declared"),
    }

    if let Some(dims) = model_metadata.dimensions {
        let footprint =
            estimate_footprint(&dims, plan.offload_layers, plan.context_size, plan.cache_type);
        println!("  Estimated VRAM: {}", format_size(footprint));
    }

    Ok(())
}

//! Serve command: the host's startup sequence

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use dialoguer::{theme::ColorfulTheme, Select};

use super::ServeArgs;
use crate::backend::LlamaServerFactory;
use crate::config::{discover_settings_file, InferenceConfig, ServerConfig, SettingsLayers};
use crate::engine::{IdleWatchdog, LoadRequest, Planner, Scheduler};
use crate::extensions::load_extensions;
use crate::loader::{list_available, AvailableModel};
use crate::model::{model_name_from_arg, MetadataSource};
use crate::server::Supervisor;
use crate::shutdown::{wait_for_termination, ShutdownHandler, ShutdownOutcome};

/// Start the host and serve until a termination signal
pub async fn serve(args: ServeArgs) -> Result<()> {
    tracing::info!("Starting llmhost {}", env!("CARGO_PKG_VERSION"));
    let root = PathBuf::from(".");

    let source = discover_settings_file(args.settings.as_deref(), &root);
    let layers = SettingsLayers::load(args.overrides(), source)?;

    let server: ServerConfig = layers.interface().view()?;
    for warning in server.warnings() {
        tracing::warn!("{}", warning);
    }

    let model_dir = args.model_dir();
    let metadata = MetadataSource::load(&model_dir)?;
    let models = match list_available(&model_dir) {
        Ok(models) => models,
        Err(e) => {
            tracing::warn!("Cannot read model directory {}: {}", model_dir.display(), e);
            Vec::new()
        }
    };

    let model_name = match select_model(&args, &models)? {
        Selection::Model(name) => Some(name),
        Selection::NoModel => None,
        Selection::NoneAvailable => {
            tracing::error!("No models are available! Please download at least one.");
            return Ok(());
        }
    };

    let planner = Planner::new(layers, metadata);
    let factory = Arc::new(LlamaServerFactory::new(&args.llama_server, &model_dir));
    let scheduler = Arc::new(Scheduler::new(factory));

    if let Some(name) = model_name {
        let planned = planner.plan(&LoadRequest::new(name))?;
        if let Err(e) = scheduler.load(planned.identity, planned.plan).await {
            tracing::error!("Failed to load the model: {}", e);
            tracing::info!("Serving without a model; load one through the API");
        }
    }

    let shutdown = ShutdownHandler::new(scheduler.clone());

    let inference: InferenceConfig = planner.layers().interface().view()?;
    let watchdog = inference.idle_threshold().map(|threshold| {
        IdleWatchdog::new(scheduler.clone(), threshold).spawn(shutdown.subscribe())
    });

    let extensions = load_extensions(&root, &args.extensions, server.api_only);

    let planner = Arc::new(RwLock::new(planner));
    let mut supervisor = Supervisor::new(&root, scheduler.clone(), planner, extensions);
    let restart = supervisor.restart_flag();
    let handle = supervisor.publish().await?;
    let mut supervise = tokio::spawn(supervisor.supervise(handle, shutdown.subscribe()));

    let finished = tokio::select! {
        signal = wait_for_termination(Some(restart)) => {
            tracing::info!("Received {}", signal);
            None
        }
        result = &mut supervise => Some(result),
    };

    shutdown.arm_forced_exit();
    let outcome = shutdown.release().await;
    if outcome == ShutdownOutcome::TimedOut {
        tracing::warn!("Abandoning the in-flight request, exiting");
    } else {
        tracing::debug!(?outcome, "Model released");
    }

    if let Some(watchdog) = watchdog {
        let _ = watchdog.await;
    }

    let result = match finished {
        Some(result) => result,
        None => supervise.await,
    };
    match result {
        Ok(Ok(())) => {
            tracing::info!("Goodbye");
            Ok(())
        }
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(anyhow!("supervisor task failed: {}", e)),
    }
}

enum Selection {
    Model(String),
    NoModel,
    NoneAvailable,
}

fn select_model(args: &ServeArgs, models: &[AvailableModel]) -> Result<Selection> {
    if let Some(model) = &args.model {
        if model == "None" {
            return Ok(Selection::NoModel);
        }
        return Ok(Selection::Model(model_name_from_arg(model)));
    }
    if !args.model_menu {
        return Ok(Selection::NoModel);
    }
    if models.is_empty() {
        return Ok(Selection::NoneAvailable);
    }

    let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
    let index = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Which model do you want to load?")
        .items(&names)
        .default(0)
        .interact()?;
    Ok(Selection::Model(names[index].to_string()))
}

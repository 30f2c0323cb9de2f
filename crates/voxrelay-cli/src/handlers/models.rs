//! Conversion model handlers.

use std::path::PathBuf;

use anyhow::Result;
use voxrelay_core::ModelUpload;

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::presentation::{print_separator, truncate_string};
use crate::store_commands::ModelCommand;

pub async fn execute(ctx: &CliContext, command: ModelCommand) -> Result<()> {
    match command {
        ModelCommand::Import {
            name,
            weights,
            index,
        } => import(ctx, name, weights, index).await,
        ModelCommand::List => list(ctx).await,
        ModelCommand::Remove { model } => remove(ctx, &model).await,
    }
}

async fn import(
    ctx: &CliContext,
    name: String,
    weights: PathBuf,
    index: Option<PathBuf>,
) -> Result<()> {
    let mut upload = ModelUpload::new(name, weights);
    if let Some(index) = index {
        upload = upload.with_index(index);
    }
    let model = ctx
        .app()
        .conversion_models()
        .import(upload)
        .await
        .map_err(CliError::from)?;
    println!("Imported '{}' as {}.", model.display_name, model.id);
    Ok(())
}

async fn list(ctx: &CliContext) -> Result<()> {
    let models = ctx
        .app()
        .conversion_models()
        .list()
        .await
        .map_err(CliError::from)?;
    if models.is_empty() {
        println!("No conversion models imported.");
        println!("Use 'voxrelay models import <name> <weights>' to add one.");
        return Ok(());
    }

    println!(
        "{:<18} {:<24} {:>10} {:<6} {:<20}",
        "ID", "Name", "Size (MB)", "Index", "Imported"
    );
    print_separator(82);
    for model in models {
        #[allow(clippy::cast_precision_loss)]
        let size_mb = model.size_bytes as f64 / (1024.0 * 1024.0);
        println!(
            "{:<18} {:<24} {:>10.1} {:<6} {:<20}",
            model.id,
            truncate_string(&model.display_name, 23),
            size_mb,
            if model.index_path.is_some() { "yes" } else { "no" },
            model.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn remove(ctx: &CliContext, reference: &str) -> Result<()> {
    let model = ctx
        .app()
        .conversion_models()
        .remove(reference)
        .await
        .map_err(CliError::from)?;
    println!("Removed '{}' ({}).", model.display_name, model.id);
    Ok(())
}

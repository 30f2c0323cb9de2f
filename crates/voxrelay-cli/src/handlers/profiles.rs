//! Quality profile handlers.

use anyhow::Result;
use serde_json::Value;
use voxrelay_core::{ParamMap, QualityProfile};

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::presentation::{print_separator, truncate_string};
use crate::store_commands::ProfileCommand;

pub async fn execute(ctx: &CliContext, command: ProfileCommand) -> Result<()> {
    match command {
        ProfileCommand::List { backend } => list(ctx, backend.as_deref()).await,
        ProfileCommand::Set {
            backend,
            name,
            params,
            default,
        } => set(ctx, backend, name, &params, default).await,
        ProfileCommand::Remove { backend, name } => remove(ctx, &backend, &name).await,
    }
}

async fn list(ctx: &CliContext, backend: Option<&str>) -> Result<()> {
    let profiles = ctx
        .app()
        .quality_profiles()
        .list(backend)
        .await
        .map_err(CliError::from)?;
    if profiles.is_empty() {
        println!("No quality profiles stored.");
        return Ok(());
    }

    println!(
        "{:<12} {:<16} {:<8} {:<20} Params",
        "Backend", "Name", "Default", "Expires"
    );
    print_separator(90);
    for profile in profiles {
        let expires = profile.expires_at.map_or_else(
            || "never".to_string(),
            |at| at.format("%Y-%m-%d %H:%M").to_string(),
        );
        println!(
            "{:<12} {:<16} {:<8} {:<20} {}",
            truncate_string(&profile.backend_id, 11),
            truncate_string(&profile.name, 15),
            if profile.is_default { "yes" } else { "" },
            expires,
            serde_json::to_string(&profile.params)?
        );
    }
    Ok(())
}

async fn set(
    ctx: &CliContext,
    backend: String,
    name: String,
    raw_params: &[String],
    default: bool,
) -> Result<()> {
    let params = parse_params(raw_params)?;
    let mut profile = QualityProfile::new(name, backend, params);
    if default {
        profile = profile.as_default();
    }
    let stored = ctx
        .app()
        .quality_profiles()
        .set(profile)
        .await
        .map_err(CliError::from)?;
    println!(
        "Profile '{}' stored for backend '{}'{}.",
        stored.name,
        stored.backend_id,
        if stored.is_default { " (default)" } else { "" }
    );
    Ok(())
}

async fn remove(ctx: &CliContext, backend: &str, name: &str) -> Result<()> {
    let removed = ctx
        .app()
        .quality_profiles()
        .remove(backend, name)
        .await
        .map_err(CliError::from)?;
    if !removed {
        return Err(CliError::NotFound(format!("quality profile '{name}' for '{backend}'")).into());
    }
    println!("Profile '{name}' removed.");
    Ok(())
}

/// Parse `KEY=VALUE` pairs. Values are JSON when they parse as JSON and
/// plain strings otherwise, so `speed=1.2` is a number and `voice=af` a string.
pub fn parse_params(raw: &[String]) -> Result<ParamMap, CliError> {
    raw.iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| CliError::Arguments(format!("expected KEY=VALUE, got '{pair}'")))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(CliError::Arguments(format!("empty parameter name in '{pair}'")));
            }
            let value = serde_json::from_str(value.trim())
                .unwrap_or_else(|_| Value::String(value.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

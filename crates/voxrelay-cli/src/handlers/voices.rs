//! Voice profile handlers.

use std::path::PathBuf;

use anyhow::Result;
use voxrelay_core::VoiceProfile;

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::presentation::{format_optional, print_separator, truncate_string};
use crate::store_commands::VoiceCommand;

pub async fn execute(ctx: &CliContext, command: VoiceCommand) -> Result<()> {
    match command {
        VoiceCommand::Add {
            name,
            audio,
            text,
            language,
        } => add(ctx, name, audio, text, language).await,
        VoiceCommand::List => list(ctx).await,
        VoiceCommand::Remove { id } => remove(ctx, &id).await,
    }
}

async fn add(
    ctx: &CliContext,
    name: String,
    audio: PathBuf,
    text: Option<String>,
    language: Option<String>,
) -> Result<()> {
    let mut profile = VoiceProfile::new(name, audio);
    if let Some(text) = text {
        profile = profile.with_reference_text(text);
    }
    if let Some(language) = language {
        profile = profile.with_language(language);
    }
    let profile = ctx
        .app()
        .voice_profiles()
        .add(profile)
        .await
        .map_err(CliError::from)?;
    println!("Voice '{}' added as {}.", profile.name, profile.id);
    Ok(())
}

async fn list(ctx: &CliContext) -> Result<()> {
    let voices = ctx
        .app()
        .voice_profiles()
        .list()
        .await
        .map_err(CliError::from)?;
    if voices.is_empty() {
        println!("No voice profiles stored.");
        return Ok(());
    }

    println!("{:<36} {:<20} {:<6} Reference", "ID", "Name", "Lang");
    print_separator(100);
    for voice in voices {
        println!(
            "{:<36} {:<20} {:<6} {}",
            voice.id,
            truncate_string(&voice.name, 19),
            format_optional(voice.language.as_ref(), "--"),
            voice.reference_audio.display()
        );
    }
    Ok(())
}

async fn remove(ctx: &CliContext, id: &str) -> Result<()> {
    if !ctx
        .app()
        .voice_profiles()
        .remove(id)
        .await
        .map_err(CliError::from)?
    {
        return Err(CliError::NotFound(format!("voice profile {id}")).into());
    }
    println!("Voice profile {id} removed.");
    Ok(())
}

use std::io::Write;

use color_eyre::{eyre::eyre, Result};
use picvault_core::{records::TagUpdate, store::DocumentStore, validator::ImageValidator};
use picvault_crypto::FieldCipher;
use picvault_sync::{FetchOutcome, HttpImageValidator, SyncStatus, Synchronizer};

use crate::{cli::Command, config, storage};

/// Build the synchronizer from config and run one collection command.
pub async fn handle(cmd: Command, user: Option<&str>, config: &config::Config) -> Result<()> {
    let settings = config.sync_settings();
    let validator = HttpImageValidator::new(settings.validation_timeout, settings.max_image_bytes)
        .map_err(|e| eyre!(e.to_string()))?;
    let sync =
        Synchronizer::new(storage::store_from_config(config)?, validator).with_settings(settings);

    let mut stdout = std::io::stdout();
    execute(&sync, cmd, user, &mut stdout).await
}

pub async fn execute<S, V, W>(
    sync: &Synchronizer<S, V>,
    cmd: Command,
    user: Option<&str>,
    out: &mut W,
) -> Result<()>
where
    S: DocumentStore,
    V: ImageValidator,
    W: Write,
{
    let user = user.ok_or_else(|| {
        eyre!("no user id: pass --user, set PICVAULT_USER_ID, or add user_id to the config file")
    })?;
    let user = Some(user);

    match cmd {
        Command::List => {
            let status = sync
                .write_urls_to_store(user)
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            report(&status, out)?;
            print_collection(sync, out)?;
        }
        Command::Add { urls } => {
            let added = sync
                .add_images(user, &urls)
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            for outcome in &added.outcomes {
                let label = if outcome.success { "added" } else { "rejected" };
                writeln!(out, "{label:<8} {}", outcome.url)?;
            }
            report(&added.status, out)?;
        }
        Command::Tag { url, tags } => {
            let status = sync
                .edit_urls(user, &[TagUpdate::new(url.as_str(), tags)], &[], &[])
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            report(&status, out)?;
            confirm(sync, &status, &[url], "tags updated", out)?;
        }
        Command::Like { urls } => {
            let status = sync
                .edit_urls(user, &[], &[], &urls)
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            report(&status, out)?;
            confirm(sync, &status, &urls, "like toggled", out)?;
        }
        Command::Remove { urls } => {
            let before = sync
                .fetch_and_decrypt_urls(user)
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            let status = sync
                .edit_urls(user, &[], &urls, &[])
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            report(&status, out)?;
            if status == SyncStatus::Persisted {
                for url in &urls {
                    let was_stored = before.iter().any(|r| &r.url == url);
                    if was_stored && !sync.mirror().contains_url(url) {
                        writeln!(out, "removed: {url}")?;
                    } else {
                        writeln!(out, "not in collection: {url}")?;
                    }
                }
            }
        }
        Command::Health => run_health(sync, user, out).await?,
        Command::Version | Command::Config(_) => {
            return Err(eyre!("not a collection command"));
        }
    }
    Ok(())
}

fn print_collection<S, V, W>(sync: &Synchronizer<S, V>, out: &mut W) -> Result<()>
where
    S: DocumentStore,
    V: ImageValidator,
    W: Write,
{
    let records = sync.mirror().records();
    if records.is_empty() {
        writeln!(out, "No images yet. Add one with `picvault add <url>`.")?;
        return Ok(());
    }
    for record in records {
        let marker = if record.liked { "♥" } else { " " };
        writeln!(out, "{marker} {}", record.url)?;
        if !record.tags.is_empty() {
            writeln!(out, "    tags: {}", record.tags.join(", "))?;
        }
    }
    Ok(())
}

fn confirm<S, V, W>(
    sync: &Synchronizer<S, V>,
    status: &SyncStatus,
    urls: &[String],
    action: &str,
    out: &mut W,
) -> Result<()>
where
    S: DocumentStore,
    V: ImageValidator,
    W: Write,
{
    if *status != SyncStatus::Persisted {
        return Ok(());
    }
    for url in urls {
        if sync.mirror().contains_url(url) {
            writeln!(out, "{action}: {url}")?;
        } else {
            writeln!(out, "not in collection: {url}")?;
        }
    }
    Ok(())
}

fn report<W: Write>(status: &SyncStatus, out: &mut W) -> Result<()> {
    match status {
        SyncStatus::ReadFailed(err) => {
            writeln!(out, "warning: collection unavailable, nothing changed ({err})")?
        }
        SyncStatus::WriteFailed(err) => {
            writeln!(out, "warning: changes were not saved ({err})")?
        }
        SyncStatus::Skipped | SyncStatus::Persisted | SyncStatus::Reloaded => {}
    }
    Ok(())
}

/// Round-trip a probe through the user's cipher and read the remote document.
async fn run_health<S, V, W>(sync: &Synchronizer<S, V>, user: Option<&str>, out: &mut W) -> Result<()>
where
    S: DocumentStore,
    V: ImageValidator,
    W: Write,
{
    let user_id = user.ok_or_else(|| eyre!("no user id"))?;
    let cipher = FieldCipher::for_user(user_id);
    let probe = "picvault-health";
    let decrypted = cipher
        .decrypt(&cipher.encrypt(probe))
        .map_err(|e| eyre!(e.to_string()))?;
    if decrypted != probe {
        color_eyre::eyre::bail!("cipher round-trip failed");
    }
    writeln!(out, "Cipher: ok")?;

    match sync.fetch(user).await.map_err(|e| eyre!(e.to_string()))? {
        FetchOutcome::Empty => writeln!(out, "Store: ok (no document yet)")?,
        FetchOutcome::Collection(snapshot) => {
            writeln!(out, "Store: ok ({} images)", snapshot.records.len())?;
            if !snapshot.undecryptable.is_empty() {
                writeln!(
                    out,
                    "warning: {} stored record(s) could not be decrypted",
                    snapshot.undecryptable.len()
                )?;
            }
        }
        FetchOutcome::Unavailable(err) => {
            color_eyre::eyre::bail!("store unavailable: {err}")
        }
    }
    Ok(())
}

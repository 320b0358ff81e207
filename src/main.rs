// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Proteus CLI entrypoint.
//!
//! Opens one file as a text file model, applies a single command and saves through the same
//! pipeline an editor would use, including conflict detection against the last read.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use proteus::config::{ModelConfig, Settings, WriteDurability};
use proteus::model::LoadReason;
use proteus::store::{DiskBackupStore, DiskFileService};
use proteus::{LoadOptions, ModelManager, Resource, SaveOptions, TextEdit};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [options] <file> show\n  {program} [options] <file> append <text>\n  {program} [options] <file> replace <text>\n  {program} [options] <file> touch\n\nOptions:\n  --config <file>           JSON model configuration\n  --backup-dir <dir>        restore from and keep backups of unsaved content in <dir>\n  --durable-writes          fsync written files and renames where supported\n  --force                   save even when the content did not change\n  --ignore-modified-since   overwrite the file even if it changed on disk since it was read\n\nSet RUST_LOG (e.g. RUST_LOG=proteus=trace) for diagnostics."
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Show,
    Append(String),
    Replace(String),
    Touch,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct CliOptions {
    config: Option<String>,
    backup_dir: Option<String>,
    durable_writes: bool,
    force: bool,
    ignore_modified_since: bool,
    file: Option<String>,
    command: Option<Command>,
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<CliOptions, ()> {
    let mut options = CliOptions::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                if options.config.is_some() {
                    return Err(());
                }
                options.config = Some(args.next().ok_or(())?);
            }
            "--backup-dir" => {
                if options.backup_dir.is_some() {
                    return Err(());
                }
                options.backup_dir = Some(args.next().ok_or(())?);
            }
            "--durable-writes" => {
                if options.durable_writes {
                    return Err(());
                }
                options.durable_writes = true;
            }
            "--force" => {
                if options.force {
                    return Err(());
                }
                options.force = true;
            }
            "--ignore-modified-since" => {
                if options.ignore_modified_since {
                    return Err(());
                }
                options.ignore_modified_since = true;
            }
            _ if arg.starts_with("--") => return Err(()),
            _ if options.file.is_none() => options.file = Some(arg),
            _ if options.command.is_none() => {
                let command = match arg.as_str() {
                    "show" => Command::Show,
                    "append" => Command::Append(args.next().ok_or(())?),
                    "replace" => Command::Replace(args.next().ok_or(())?),
                    "touch" => Command::Touch,
                    _ => return Err(()),
                };
                options.command = Some(command);
            }
            _ => return Err(()),
        }
    }

    if options.file.is_none() || options.command.is_none() {
        return Err(());
    }

    Ok(options)
}

fn absolute(path: &str) -> std::io::Result<PathBuf> {
    let path = Path::new(path);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

async fn run(options: CliOptions) -> Result<(), Box<dyn Error>> {
    let (Some(file), Some(command)) = (options.file, options.command) else {
        return Err("missing file or command".into());
    };

    let mut config = match &options.config {
        Some(path) => ModelConfig::load(Path::new(path))?,
        None => ModelConfig::default(),
    };
    if options.durable_writes {
        config.durability = WriteDurability::Durable;
    }
    let durability = config.durability;
    let settings = Arc::new(Settings::new(config)?);

    let mut manager =
        ModelManager::new(Arc::new(DiskFileService::new(durability))).with_settings(settings);
    if let Some(dir) = options.backup_dir {
        manager = manager.with_backups(Arc::new(DiskBackupStore::new(dir, durability)));
    }

    let resource = Resource::from_path(&absolute(&file)?)?;
    let load = LoadOptions {
        reason: LoadReason::Editor,
        ..LoadOptions::default()
    };
    let model = manager.resolve(&resource, load).await?;

    let force = match command {
        Command::Show => {
            print!("{}", model.text().unwrap_or_default());
            log::info!("{resource}: {:?}, version {}", model.status(), model.version_id());
            return Ok(());
        }
        Command::Append(text) => {
            let len = model.text().map_or(0, |content| content.len());
            model.apply_edit(&TextEdit::insert(len, text))?;
            options.force
        }
        Command::Replace(text) => {
            model.set_content(&text)?;
            options.force
        }
        Command::Touch => true,
    };

    let save = SaveOptions {
        force,
        ignore_modified_since: options.ignore_modified_since,
        ignore_error_handler: true,
        ..SaveOptions::default()
    };
    if !model.save(save).await? {
        return Err(format!("{resource}: not saved ({:?})", model.status()).into());
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let result = (|| -> Result<(), Box<dyn Error>> {
        let mut args = std::env::args();
        let program = args.next().unwrap_or_else(|| "proteus".to_owned());

        let options = match parse_options(args) {
            Ok(options) => options,
            Err(()) => {
                print_usage(&program);
                std::process::exit(2);
            }
        };

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        runtime.block_on(run(options))
    })();

    if let Err(err) = result {
        eprintln!("proteus: {err}");
        std::process::exit(1);
    }
}

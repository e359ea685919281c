mod renderer;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use stackreplay_core::{BuildOptions, ProfileModel};

/// Inspect V8 CPU profiles as call trees and frame timelines
#[derive(Parser, Debug)]
#[command(name = "stackreplay")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct ProfileArgs {
    /// Path to a .cpuprofile file
    path: PathBuf,

    /// Keep `native ` frames instead of folding them into their callers
    #[arg(long, env = "STACKREPLAY_KEEP_NATIVES")]
    keep_natives: bool,
}

impl ProfileArgs {
    fn load(&self) -> Result<ProfileModel> {
        let data = std::fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let options = BuildOptions {
            keep_native_frames: self.keep_natives,
        };
        ProfileModel::from_json(&data, options)
            .with_context(|| format!("failed to load profile {}", self.path.display()))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a summary of the profile
    Info {
        #[command(flatten)]
        profile: ProfileArgs,
    },

    /// Print the call tree with self and total times
    Tree {
        #[command(flatten)]
        profile: ProfileArgs,

        /// Do not descend below this depth
        #[arg(long)]
        max_depth: Option<u32>,
    },

    /// Print the frame open/close stream
    Events {
        #[command(flatten)]
        profile: ProfileArgs,

        /// Window start in milliseconds
        #[arg(long)]
        start: Option<f64>,

        /// Window end in milliseconds
        #[arg(long)]
        stop: Option<f64>,
    },
}

fn label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Info { profile } => {
            let model = profile.load()?;
            renderer::write_info(&mut out, &label(&profile.path), &model)?;
        }
        Commands::Tree { profile, max_depth } => {
            let model = profile.load()?;
            renderer::write_tree(&mut out, &model, max_depth)?;
        }
        Commands::Events {
            profile,
            start,
            stop,
        } => {
            let mut model = profile.load()?;
            let start = start.unwrap_or(f64::NEG_INFINITY);
            let stop = stop.unwrap_or(f64::INFINITY);
            log::debug!("replaying {} samples in [{start}, {stop})", model.samples().len());
            let mut writer = renderer::EventWriter::new(&mut out);
            model.for_each_frame_in(&mut writer, start, stop);
            writer.finish()?;
        }
    }

    out.flush()?;
    Ok(())
}

use clap::{Parser, Subcommand};
use stem_to_midi::{
    build_model, load_config, run_basic, run_stems, scan_basic, scan_stems,
    set_batch_progress_callback, BasicPitch, BatchProgress, BatchReport, Config, FileOutcome,
    SeparationModel, SeparatorBackend, Stage,
};
use std::{path::PathBuf, process};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stem-to-midi")]
#[command(about = "Batch MP3 to MIDI transcription with optional stem separation", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./stem-to-midi.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Input directory, overrides the config
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,

    /// Output directory, overrides the config
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transcribe each new input directly
    Basic,

    /// Separate each new input into stems, transcribe and merge them
    Stems {
        /// Keep the per-stem MIDI files only
        #[arg(long)]
        no_combine: bool,
    },

    /// List inputs that still need processing
    Scan {
        /// Use the stem-mode completion rule
        #[arg(long)]
        stems: bool,
    },

    /// Download and load the separation model without processing anything
    PrepareModel,

    /// Print the effective configuration
    ShowConfig,
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(input) = cli.input.clone() {
                config.input_dir = input;
            }
            if let Some(output) = cli.output.clone() {
                config.output_dir = output;
            }
            config
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    init_tracing(&config, cli.quiet);

    let result = match cli.command {
        Commands::Basic => handle_basic(&config, cli.quiet),
        Commands::Stems { no_combine } => {
            let mut config = config;
            if no_combine {
                config.combine = false;
            }
            handle_stems(&config, cli.quiet)
        }
        Commands::Scan { stems } => handle_scan(&config, stems),
        Commands::PrepareModel => handle_prepare_model(&config, cli.quiet),
        Commands::ShowConfig => handle_show_config(&config),
    };

    // Per-file failures are reported, not turned into an exit code.
    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn init_tracing(config: &Config, quiet: bool) {
    let default_level = if quiet { "warn" } else { config.log_level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn handle_basic(config: &Config, quiet: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !quiet {
        setup_progress_callback();
        print_banner("Basic", config);
    }

    let transcriber = BasicPitch::from_config(&config.transcriber);
    let report = run_basic(config, &transcriber)?;
    print_report(&report, quiet);
    Ok(())
}

fn handle_stems(config: &Config, quiet: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !quiet {
        setup_progress_callback();
        print_banner("Stems", config);
        let backend = match config.separator.backend {
            SeparatorBackend::Onnx => "onnx",
            SeparatorBackend::Command => "command",
        };
        eprintln!("Model:  {} ({backend})", config.separator.model);
        eprintln!();
    }

    let model = build_model(&config.separator)?;
    let transcriber = BasicPitch::from_config(&config.transcriber);
    let report = run_stems(config, model.as_ref(), &transcriber)?;
    print_report(&report, quiet);

    if !quiet && config.combine && report.converted().next().is_some() {
        eprintln!("MIDI channels used:");
        eprintln!("  🥁 Drums:  Channel 10 (standard MIDI drum channel)");
        eprintln!("  🎸 Bass:   Channel 1");
        eprintln!("  🎤 Vocals: Channel 2");
        eprintln!("  🎹 Other:  Channel 3");
    }
    Ok(())
}

fn handle_scan(config: &Config, stems: bool) -> Result<(), Box<dyn std::error::Error>> {
    let scan = if stems {
        scan_stems(config)?
    } else {
        scan_basic(config)?
    };
    for path in &scan.pending {
        println!("{}", path.display());
    }
    eprintln!(
        "{} pending, {} already processed",
        scan.pending.len(),
        scan.done.len()
    );
    Ok(())
}

fn handle_prepare_model(config: &Config, quiet: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !quiet {
        setup_progress_callback();
        eprintln!("📦 Preparing model: {}", config.separator.model);
        eprintln!();
    }

    let model = build_model(&config.separator)?;

    if !quiet {
        eprintln!("✅ Model prepared successfully!");
        eprintln!("   Sources: {}", model.sources().join(", "));
    }
    Ok(())
}

fn handle_show_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn print_banner(mode: &str, config: &Config) {
    eprintln!("🎵 Stem to MIDI ({mode})");
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!("Input:  {}", config.input_dir.display());
    eprintln!("Output: {}", config.output_dir.display());
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

fn print_report(report: &BatchReport, quiet: bool) {
    if quiet {
        // Quiet mode: just print the produced files
        for file in &report.files {
            if let FileOutcome::Converted { outputs }
            | FileOutcome::PartiallyConverted { outputs, .. } = &file.outcome
            {
                for out in outputs {
                    println!("{}", out.display());
                }
            }
        }
        return;
    }

    eprintln!();
    if report.files.is_empty() {
        eprintln!("✅ Nothing to do ({} already processed)", report.skipped.len());
        return;
    }

    for file in &report.files {
        let input = file.input.display();
        match &file.outcome {
            FileOutcome::Converted { outputs } => {
                eprintln!("  ✅ {input}");
                for out in outputs {
                    eprintln!("       → {}", out.display());
                }
            }
            FileOutcome::PartiallyConverted { outputs, failures } => {
                eprintln!("  ⚠️  {input} ({} stem(s) failed)", failures.len());
                for out in outputs {
                    eprintln!("       → {}", out.display());
                }
                for failure in failures {
                    eprintln!("       ✗ {failure}");
                }
            }
            FileOutcome::TranscriptionFailed { failures } => {
                eprintln!("  ❌ {input}: transcription failed");
                for failure in failures {
                    eprintln!("       ✗ {failure}");
                }
            }
            FileOutcome::SeparationFailed { message } => {
                eprintln!("  ❌ {input}: separation failed: {message}");
            }
            FileOutcome::Failed { message } => {
                eprintln!("  ❌ {input}: {message}");
            }
        }
    }

    eprintln!();
    eprintln!(
        "Done: {} converted, {} failed, {} skipped",
        report.converted().count(),
        report.failed().count(),
        report.skipped.len()
    );
}

fn setup_progress_callback() {
    set_batch_progress_callback(|progress| match progress {
        BatchProgress::Scanned { pending, done } => {
            eprintln!("🔍 Found {pending} new file(s), {done} already processed");
        }
        BatchProgress::FileStarted {
            index,
            total,
            input,
        } => {
            eprintln!("⏳ [{}/{}] {}", index + 1, total, input.display());
        }
        BatchProgress::Stage(stage) => {
            let stage_name = match stage {
                Stage::Separate => "Separating stems",
                Stage::Transcribe => "Transcribing stems",
                Stage::Combine => "Combining MIDI",
            };
            eprintln!("   🔄 {}", stage_name);
        }
        BatchProgress::Download { downloaded, total } => {
            if total > 0 {
                let pct = (downloaded as f64 / total as f64 * 100.0).min(100.0);
                eprint!(
                    "\rDownloading model: {:>3.0}% ({:.2} MB / {:.2} MB)",
                    pct,
                    downloaded as f64 / 1_000_000.0,
                    total as f64 / 1_000_000.0
                );
                if downloaded >= total {
                    eprintln!();
                }
            } else {
                eprint!("\rDownloading model: {:.2} MB", downloaded as f64 / 1_000_000.0);
            }
        }
        BatchProgress::FileFinished { .. } => {
            // Summarized in print_report
        }
    });
}

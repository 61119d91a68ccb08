use clap::{Args as ClapArgs, Parser, Subcommand};
use entrain_engine::api;
use entrain_engine::config::BackendConfig;
use entrain_engine::models::TrackData;

/// CLI for streaming or rendering an entrainment track
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream or render a track JSON file
    Run(RunArgs),
    /// Generate a default config file and exit
    GenerateConfig(ConfigArgs),
}

#[derive(ClapArgs)]
struct RunArgs {
    /// Path to the track JSON file
    #[arg(long)]
    path: String,
    /// Render the full track to the output file instead of streaming
    #[arg(long, default_value_t = false)]
    generate: bool,
    /// Start position in seconds
    #[arg(long, default_value_t = 0.0)]
    start: f64,
}

#[derive(ClapArgs)]
struct ConfigArgs {
    /// Output path for the generated configuration
    #[arg(long, default_value = "config.toml")]
    out: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    api::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_command(args)?,
        Commands::GenerateConfig(cfg) => {
            BackendConfig::generate_default(&cfg.out)?;
            println!("Generated default config at {}", cfg.out);
        }
    }
    Ok(())
}

fn run_command(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let json_str = std::fs::read_to_string(&args.path)?;

    if args.generate {
        let track_data: TrackData = serde_json::from_str(&json_str)?;
        let out_name = track_data
            .global_settings
            .output_filename
            .clone()
            .ok_or("outputFilename missing in global settings")?;
        api::render_full_wav(&json_str, &out_name)?;
        println!("Generated full track at {out_name}");
        return Ok(());
    }

    api::load_track(&json_str, Some(args.start))?;
    println!("Streaming {}... press Ctrl+C to stop", args.path);

    let (tx, rx) = crossbeam::channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    let _ = rx.recv();

    api::stop();
    Ok(())
}

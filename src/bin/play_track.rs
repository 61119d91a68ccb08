use clap::Parser;
use entrain_engine::api;

/// Simple CLI to play a track JSON file
#[derive(Parser)]
struct Args {
    /// Path to the track JSON file
    track_file: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    api::init();
    let args = Args::parse();
    let json_str = std::fs::read_to_string(&args.track_file)?;

    api::load_track(&json_str, None)?;
    println!("Playing {}... press Ctrl+C to stop", args.track_file);

    let (tx, rx) = crossbeam::channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    let _ = rx.recv();

    api::stop();
    Ok(())
}

use clap::Parser;
use larvatrack::cli::CommandLineArguments;
use larvatrack::config::TrackingConfig;
use larvatrack::log_error;
use larvatrack::logger::Logger;
use larvatrack::metrics_recorder::MetricsRecorder;
use larvatrack::run::run_tracking;
use larvatrack::store::ResultsStore;

fn main() -> anyhow::Result<()> {
    let args = CommandLineArguments::parse();
    log_error!(Logger::init());
    let recorder = MetricsRecorder::new();
    log_error!(recorder.install());

    let mut config = TrackingConfig::load(&args.config)?;
    if let Some(well) = args.well {
        config.only_track_this_one_well = Some(well);
    }
    if let Some(seek) = args.seek {
        config.first_frame = seek;
    }

    let results = run_tracking(&args.video, &config)?;

    let video_name = std::path::Path::new(&args.video)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("video")
        .to_string();
    let store = ResultsStore::new(&args.results_dir);
    store.write(&video_name, &results)?;
    log::info!(
        "Results written to {}",
        store.results_path(&video_name).display()
    );

    recorder.update_summaries();
    recorder.visit_counters(|key, value| log::info!("{}: {}", key.name(), value));
    recorder.visit_summaries(|key, summary, _| {
        log::info!(
            "{}: p50 {:.6}s p99 {:.6}s",
            key.name(),
            summary.quantile(0.5).unwrap_or(0.0),
            summary.quantile(0.99).unwrap_or(0.0)
        );
    });
    Ok(())
}

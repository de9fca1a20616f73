use clap::Parser;

use log::{error, info};

use yoloprep::utils::create_progress_bar;
use yoloprep::{process_dataset, Args, PipelineConfig, PrepError};

fn main() {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match PipelineConfig::try_from(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    info!("Starting the conversion process...");

    let pb = create_progress_bar(0, "Dataset");
    match process_dataset(&config, &pb) {
        Ok(report) => {
            pb.finish_with_message("Processing complete");
            info!(
                "Dataset written to {} ({} of {} images converted)",
                config.output_dir.display(),
                report.stats.converted + report.stats.image_only,
                report.stats.total_tasks
            );
        }
        Err(e) => {
            pb.abandon();
            error!("Failed to process dataset: {}", e);
            let code = if matches!(e, PrepError::Config(_)) { 2 } else { 1 };
            std::process::exit(code);
        }
    }
}

use clap::Parser;

/// Fast tail tracking and bout kinematics for well-plate videos
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CommandLineArguments {
    /// Video file or folder of numbered frame images to track
    #[arg(short, long)]
    pub video: String,
    /// Path to tracking configuration json
    #[arg(long)]
    pub config: String,
    /// Folder receiving one results file per video
    #[arg(long, default_value = "results")]
    pub results_dir: String,
    /// Restrict the run to a single well index
    #[arg(long)]
    pub well: Option<usize>,
    /// Start tracking at this frame instead of the configured first frame
    #[arg(long)]
    pub seek: Option<u32>,
}

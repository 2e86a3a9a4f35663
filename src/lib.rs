pub mod background;
pub mod bouts;
pub mod cli;
pub mod config;
pub mod kinematics;
pub mod logger;
pub mod matcher;
pub mod metrics_recorder;
pub mod run;
pub mod store;
pub mod tracker;
pub mod types;
pub mod util;
pub mod video;

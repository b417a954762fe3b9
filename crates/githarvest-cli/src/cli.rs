use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "githarvest")]
#[command(about = "GitHarvest - parallel GitHub metadata collection", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database schema
    InitDb,

    /// Collect repositories from the live search API
    Collect {
        /// First creation date to cover (inclusive)
        #[arg(long, conflicts_with_all = ["stars_min", "stars_max"])]
        since: Option<NaiveDate>,

        /// Last creation date to cover (exclusive)
        #[arg(long, requires = "since")]
        until: Option<NaiveDate>,

        /// Collect by star range instead: lower bound (inclusive)
        #[arg(long, requires = "stars_max")]
        stars_min: Option<u32>,

        /// Star range upper bound (inclusive)
        #[arg(long)]
        stars_max: Option<u32>,
    },

    /// Collect historical event windows from the archive warehouse
    Archive {
        /// First event date to cover (inclusive)
        #[arg(long)]
        since: NaiveDate,

        /// Last event date to cover (exclusive)
        #[arg(long)]
        until: NaiveDate,
    },

    /// Geocode contributors and organizations collected earlier
    Enrich,

    /// Show work-unit progress for a phase
    Status {
        #[arg(long, default_value = "collect")]
        phase: String,
    },
}

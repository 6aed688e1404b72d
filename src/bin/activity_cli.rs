use activity_finder::activities::parse_activities;
use activity_finder::cli::CommonArgs;
use activity_finder::criteria::{RawCriteria, SearchCriteria};
use activity_finder::finder::find_activities;
use activity_finder::llm::create_model_client;
use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about = "Family activity finder tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the prompt that would be sent for the given search
    Prompt {
        #[command(flatten)]
        criteria: CriteriaArgs,
    },
    /// Parse raw model output into activity records
    Parse {
        /// File holding the model output, stdin when omitted
        input: Option<PathBuf>,
    },
    /// Run a search against the configured model
    Search {
        #[command(flatten)]
        criteria: CriteriaArgs,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Debug, Args)]
struct CriteriaArgs {
    #[arg(long)]
    city: String,
    /// Ages of the kids, e.g. "5,7"
    #[arg(long)]
    kids_ages: String,
    #[arg(long)]
    availability: String,
    #[arg(long, default_value_t = 10)]
    miles_range: u32,
    #[arg(long)]
    preferences: Option<String>,
}

impl CriteriaArgs {
    // Goes through the same checks as the HTTP body
    fn validate(self) -> Result<SearchCriteria> {
        let raw = RawCriteria {
            city: Some(self.city),
            kids_ages: Some(self.kids_ages),
            availability: Some(self.availability),
            miles_range: Some(self.miles_range.into()),
            other_preferences: self.preferences,
        };
        Ok(raw.validate()?)
    }
}

fn read_input(input: Option<PathBuf>) -> Result<String> {
    match input {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Prompt { criteria } => {
            println!("{}", criteria.validate()?.to_prompt());
        }
        Command::Parse { input } => {
            let raw = read_input(input)?;
            let activities = parse_activities(&raw);
            println!("{}", serde_json::to_string_pretty(&activities)?);
            if activities.is_empty() {
                return Err(anyhow!("No activities found in input"));
            }
        }
        Command::Search { criteria, common } => {
            let criteria = criteria.validate()?;
            let client = create_model_client(&common.model_client_config())?;
            info!(model = client.model_name(), "Running search");
            let search = find_activities(
                client.as_ref(),
                &criteria,
                &common.generation_settings(),
                &common.retry_policy(),
            )
            .await?;
            for query in &search.search_queries {
                eprintln!("searched: {}", query);
            }
            println!("{}", serde_json::to_string_pretty(&search.activities)?);
        }
    }

    Ok(())
}

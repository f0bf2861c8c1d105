use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder};
use serde_json::json;

#[derive(Parser)]
#[command(name = "dw-cli")]
#[command(about = "Digital Workspace CLI", long_about = None)]
struct Cli {
    #[arg(short, long, env = "DW_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health
    Health,

    /// Create a team (the root team when no parent is given)
    CreateTeam {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        abbreviation: Option<String>,

        #[arg(short, long)]
        parent: Option<String>,

        #[arg(long)]
        actor: Option<String>,
    },

    /// Move a team under a new parent
    MoveTeam {
        #[arg(value_name = "TEAM_ID")]
        id: String,

        #[arg(short, long)]
        parent: String,

        #[arg(long)]
        actor: Option<String>,
    },

    /// Show a team and its ancestors
    Team {
        #[arg(value_name = "TEAM_ID")]
        id: String,
    },

    /// Print the team picker entries
    SelectData,

    /// Delete a team with no sub-teams or members
    DeleteTeam {
        #[arg(value_name = "TEAM_ID")]
        id: String,

        #[arg(long)]
        actor: Option<String>,
    },

    /// Search one category
    Search {
        query: String,

        #[arg(short, long, default_value = "all_pages")]
        category: String,

        #[arg(short, long, default_value = "1")]
        page: usize,
    },

    /// Show how a query is weighted
    Explore { query: String },

    /// Suggest results for a partly typed query
    Autocomplete { query: String },

    /// Override a search setting
    SetSetting { key: String, value: String },

    /// Drop a runtime search setting override
    ResetSetting { key: String },

    /// Pin a page for comma-separated keywords and phrases
    Pin {
        #[arg(long)]
        content_type: String,

        #[arg(long)]
        object_id: String,

        phrases: String,
    },

    /// Exclude an object for comma-separated keywords and phrases
    Exclude {
        #[arg(long)]
        content_type: String,

        #[arg(long)]
        object_id: String,

        phrases: String,
    },

    /// Rebuild the search index
    Reindex,
}

async fn print_response(request: RequestBuilder) -> anyhow::Result<()> {
    let response = request.send().await.context("Request failed")?;
    let status = response.status();

    if status == reqwest::StatusCode::NO_CONTENT {
        println!("{}", status);
        return Ok(());
    }

    let body: serde_json::Value = response
        .json()
        .await
        .context("Response was not valid JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        bail!("Server returned {}", status);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let endpoint = cli.endpoint.trim_end_matches('/');

    match cli.command {
        Commands::Health => print_response(client.get(format!("{}/health", endpoint))).await?,

        Commands::CreateTeam {
            name,
            abbreviation,
            parent,
            actor,
        } => {
            print_response(client.post(format!("{}/v1/teams", endpoint)).json(&json!({
                "name": name,
                "abbreviation": abbreviation,
                "parent_id": parent,
                "actor": actor,
            })))
            .await?
        }

        Commands::MoveTeam { id, parent, actor } => {
            let team: serde_json::Value = client
                .get(format!("{}/v1/teams/{}", endpoint, id))
                .send()
                .await?
                .error_for_status()
                .context("Team not found")?
                .json()
                .await?;

            print_response(
                client
                    .put(format!("{}/v1/teams/{}", endpoint, id))
                    .json(&json!({
                        "name": team["name"],
                        "abbreviation": team["abbreviation"],
                        "description": team["description"],
                        "leaders_ordering": team["leaders_ordering"],
                        "parent_id": parent,
                        "actor": actor,
                    })),
            )
            .await?
        }

        Commands::Team { id } => {
            print_response(client.get(format!("{}/v1/teams/{}", endpoint, id))).await?;
            print_response(client.get(format!("{}/v1/teams/{}/parents", endpoint, id))).await?
        }

        Commands::SelectData => {
            print_response(client.get(format!("{}/v1/teams/select-data", endpoint))).await?
        }

        Commands::DeleteTeam { id, actor } => {
            let mut request = client.delete(format!("{}/v1/teams/{}", endpoint, id));
            if let Some(actor) = actor {
                request = request.query(&[("actor", actor)]);
            }
            print_response(request).await?
        }

        Commands::Search {
            query,
            category,
            page,
        } => {
            print_response(
                client
                    .get(format!("{}/v1/search/{}", endpoint, category))
                    .query(&[("q", query), ("page", page.to_string())]),
            )
            .await?
        }

        Commands::Explore { query } => {
            print_response(
                client
                    .get(format!("{}/v1/search/explore", endpoint))
                    .query(&[("q", query)]),
            )
            .await?
        }

        Commands::Autocomplete { query } => {
            print_response(
                client
                    .get(format!("{}/v1/search/autocomplete", endpoint))
                    .query(&[("q", query)]),
            )
            .await?
        }

        Commands::SetSetting { key, value } => {
            print_response(
                client
                    .put(format!("{}/v1/search/settings/{}", endpoint, key))
                    .json(&json!({ "value": value })),
            )
            .await?
        }

        Commands::ResetSetting { key } => {
            print_response(client.delete(format!("{}/v1/search/settings/{}", endpoint, key)))
                .await?
        }

        Commands::Pin {
            content_type,
            object_id,
            phrases,
        } => {
            print_response(
                client
                    .put(format!("{}/v1/search/curation/pin", endpoint))
                    .json(&json!({
                        "content_type": content_type,
                        "object_id": object_id,
                        "phrases": phrases,
                    })),
            )
            .await?
        }

        Commands::Exclude {
            content_type,
            object_id,
            phrases,
        } => {
            print_response(
                client
                    .put(format!("{}/v1/search/curation/exclusion", endpoint))
                    .json(&json!({
                        "content_type": content_type,
                        "object_id": object_id,
                        "phrases": phrases,
                    })),
            )
            .await?
        }

        Commands::Reindex => {
            print_response(client.post(format!("{}/v1/search/reindex", endpoint))).await?
        }
    }

    Ok(())
}

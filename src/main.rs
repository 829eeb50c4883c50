use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use repolens::analyzer::Analyzer;
use repolens::completion::provider_from_config;
use repolens::config::{load_config, Config};
use repolens::expertise::ScoreField;
use repolens::git::GitCliReader;
use repolens::graph::{GraphStore, SqliteGraph};
use repolens::retrieve::ChatTurn;

#[derive(Parser)]
#[command(name = "repolens", about = "Turn commit history into a queryable knowledge graph")]
struct Cli {
    /// Path to a TOML config file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone a repository and run the full analysis pipeline.
    Analyze {
        /// Repository URL or local path.
        url: String,
        /// Cap on how many commits to walk, newest first.
        #[arg(long)]
        max_commits: Option<usize>,
    },
    /// Show node and edge counts for an analyzed codebase.
    Graph {
        /// Repository URL or local path, as passed to analyze.
        codebase: String,
        /// Dump every node and relationship instead of just counts.
        #[arg(long)]
        full: bool,
    },
    /// Developer scorecards, best contributors first.
    Developers {
        /// Repository URL or local path, as passed to analyze.
        codebase: String,
        /// Score to rank by: productivity, impact, consistency,
        /// collaboration, or contribution.
        #[arg(long, default_value = "contribution")]
        sort: String,
    },
    /// Monthly summaries, milestones, and the activity heatmap.
    Timeline {
        /// Repository URL or local path, as passed to analyze.
        codebase: String,
    },
    /// Ask a question about an analyzed codebase.
    Chat {
        /// Repository URL or local path, as passed to analyze.
        codebase: String,
        /// The question; omit for an interactive session.
        question: Option<String>,
    },
    /// List analyzed codebases.
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repolens=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default_local(),
    };

    let store: Arc<dyn GraphStore> = Arc::new(
        SqliteGraph::connect(&config.storage.path)
            .await
            .context("failed to open graph database")?,
    );
    let reader = Arc::new(GitCliReader::new(&config.git, &config.storage.path));
    let provider = Arc::from(provider_from_config(&config.classifier)?);
    let analyzer = Analyzer::new(config, reader, provider, store);

    match cli.command {
        Commands::Analyze { url, max_commits } => {
            let outcome = analyzer.analyze(&url, max_commits).await?;
            println!(
                "Analyzed {} ({} commits, {} developers)",
                outcome.codebase.name,
                outcome.codebase.total_commits,
                outcome.codebase.total_developers
            );
            println!("{}", serde_json::to_string_pretty(&outcome.snapshot)?);
        }
        Commands::Graph { codebase, full } => {
            if full {
                let export = analyzer.get_graph_snapshot(&codebase).await?;
                println!("{}", serde_json::to_string_pretty(&export)?);
            } else {
                let stats = analyzer.get_graph_stats(&codebase).await?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
        }
        Commands::Developers { codebase, sort } => {
            let sort_by = ScoreField::parse(&sort)
                .with_context(|| format!("unknown score field '{}'", sort))?;
            let developers = analyzer.get_developer_scorecards(&codebase, sort_by).await?;
            if developers.is_empty() {
                println!("No developers found. Has '{}' been analyzed?", codebase);
            } else {
                println!("{}", serde_json::to_string_pretty(&developers)?);
            }
        }
        Commands::Timeline { codebase } => {
            let timeline = analyzer.get_business_timeline(&codebase).await?;
            println!("{}", serde_json::to_string_pretty(&timeline)?);
        }
        Commands::Chat { codebase, question } => match question {
            Some(q) => {
                let answer = analyzer.answer_question(&codebase, &q, &[]).await?;
                println!("{}", answer);
            }
            None => chat_loop(&analyzer, &codebase).await?,
        },
        Commands::List => {
            for id in analyzer.list_codebases().await? {
                println!("{}", id);
            }
        }
    }

    Ok(())
}

async fn chat_loop(analyzer: &Analyzer, codebase: &str) -> Result<()> {
    use std::io::{BufRead, Write};

    let stdin = std::io::stdin();
    let mut history: Vec<ChatTurn> = Vec::new();
    println!("Chatting about '{}'. Empty line to quit.", codebase);
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            break;
        }
        let answer = analyzer.answer_question(codebase, question, &history).await?;
        println!("{}", answer);
        history.push(ChatTurn {
            role: "user".to_string(),
            content: question.to_string(),
        });
        history.push(ChatTurn {
            role: "assistant".to_string(),
            content: answer,
        });
    }
    Ok(())
}

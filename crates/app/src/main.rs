use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agro_evidence_core::{
    render_entity_options, EngineConfig, FollowupOutcome, HashingNgramEmbedder, ProductCatalog,
    QdrantStore, RetrievalEngine, SessionState, TrialCatalog,
};

#[derive(Parser)]
#[command(name = "agro-evidence", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL
    #[arg(long, default_value = "http://localhost:6333", env = "QDRANT_URL")]
    qdrant_url: String,

    /// Collection holding trial-report chunks
    #[arg(long, default_value = "trial_chunks")]
    trial_collection: String,

    /// Collection holding product-label rows
    #[arg(long, default_value = "product_labels")]
    product_collection: String,

    /// Trial catalog CSV
    #[arg(long, default_value = "trials.csv", env = "TRIAL_CSV_PATH")]
    trial_csv: PathBuf,

    /// Product label catalog CSV
    #[arg(long, default_value = "labels.csv", env = "PRODUCT_CSV_PATH")]
    product_csv: PathBuf,

    /// Vector dimension of the trial collection
    #[arg(long, default_value = "256")]
    trial_vector_dim: usize,

    /// Vector dimension of the label collection
    #[arg(long, default_value = "256")]
    product_vector_dim: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Retrieve trial evidence for a question and print the context block.
    Trials {
        /// User question
        #[arg(long)]
        query: String,
        /// Write the resulting session state to this JSON file.
        #[arg(long)]
        session_out: Option<PathBuf>,
    },
    /// Query the label collection with recall boosting and consolidation.
    Products {
        /// User question
        #[arg(long)]
        query: String,
        /// Product name the user already mentioned, if any.
        #[arg(long, default_value = "")]
        product_hint: String,
    },
    /// Resolve a follow-up reference against a saved session.
    Followup {
        /// Follow-up message
        #[arg(long)]
        message: String,
        /// Session state written by a previous `trials` run.
        #[arg(long)]
        session_file: PathBuf,
        /// Explicit 1-based report indexes from an upstream classifier.
        #[arg(long, value_delimiter = ',')]
        indexes: Vec<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let trials = Arc::new(
        TrialCatalog::load(&cli.trial_csv)
            .with_context(|| format!("loading trial catalog {}", cli.trial_csv.display()))?,
    );
    let products = Arc::new(
        ProductCatalog::load(&cli.product_csv)
            .with_context(|| format!("loading label catalog {}", cli.product_csv.display()))?,
    );
    info!(
        trials = trials.records().len(),
        products = products.records().len(),
        "catalogs loaded"
    );

    let config = EngineConfig {
        trial_collection: cli.trial_collection.clone(),
        product_collection: cli.product_collection.clone(),
        trial_vector_dim: cli.trial_vector_dim,
        product_vector_dim: cli.product_vector_dim,
        ..EngineConfig::default()
    };
    let store = QdrantStore::new(&cli.qdrant_url);
    let embedder = HashingNgramEmbedder::default();
    let engine = RetrievalEngine::new(store, embedder, trials, products, config);

    match cli.command {
        Command::Trials { query, session_out } => {
            let evidence = engine
                .trial_evidence(&query)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!("query: {}", evidence.query);
            println!(
                "documents: {} | offered entities: {}",
                evidence.contexts.len(),
                evidence.entities.len()
            );
            let options = render_entity_options(&evidence.entities);
            if !options.is_empty() {
                println!("offered:\n{options}");
            }
            println!("{}", evidence.context_block);

            if let Some(path) = session_out {
                let mut session = SessionState::new("cli");
                session.record_turn(
                    &query,
                    evidence.entities,
                    evidence.hits,
                    evidence.contexts,
                );
                std::fs::write(&path, serde_json::to_string_pretty(&session)?)
                    .with_context(|| format!("writing session {}", path.display()))?;
                println!("session written to {}", path.display());
            }
        }
        Command::Products {
            query,
            product_hint,
        } => {
            let evidence = engine
                .product_evidence(&query, &query, &product_hint)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!(
                "products: {} | mode: {}",
                evidence.rows.len(),
                if evidence.compact { "compact" } else { "detailed" }
            );
            println!("{}", evidence.evidence_block);
        }
        Command::Followup {
            message,
            session_file,
            indexes,
        } => {
            let raw = std::fs::read_to_string(&session_file)
                .with_context(|| format!("reading session {}", session_file.display()))?;
            let mut session: SessionState = serde_json::from_str(&raw)
                .with_context(|| format!("parsing session {}", session_file.display()))?;

            let outcome = engine
                .followup_evidence(&mut session, &message, &indexes, &[])
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            match outcome {
                FollowupOutcome::Selected(contexts) => {
                    println!("resolved {} context(s)", contexts.len());
                    println!(
                        "{}",
                        agro_evidence_core::render_context_block(&contexts)
                    );
                    std::fs::write(&session_file, serde_json::to_string_pretty(&session)?)
                        .with_context(|| format!("writing session {}", session_file.display()))?;
                }
                FollowupOutcome::NeedsClarification => {
                    println!("could not map the reference to a report; ask the user which report they mean");
                    let options = render_entity_options(&session.offered_entities);
                    if !options.is_empty() {
                        println!("options:\n{options}");
                    }
                }
                FollowupOutcome::NoPriorEvidence => {
                    println!("no prior evidence in this session; run a new `trials` query first");
                }
            }
        }
    }

    Ok(())
}

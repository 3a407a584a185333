use clap::{Parser, Subcommand};
use nl2sql_rag::Result;
use nl2sql_rag::commands::{
    delete_index, ingest_examples, ingest_schema, load_config, query, show_config, show_status,
};
use nl2sql_rag::vector_store::VectorStoreFactory;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nl2sql-rag")]
#[command(about = "Build and query the retrieval indices behind an NL-to-SQL agent")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml (defaults to ~/.nl2sql-rag)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration with secrets masked
    Config,
    /// Embed schema documents from one or more directories
    IngestSchema {
        /// Directories to load, relative to the project root unless absolute
        #[arg(required = true)]
        dirs: Vec<PathBuf>,
        /// Target index (defaults to retrieval.schema_index)
        #[arg(long)]
        index: Option<String>,
        /// Delete the index first if it exists
        #[arg(long)]
        recreate: bool,
    },
    /// Embed question/SQL examples from a JSON file
    IngestExamples {
        /// JSON array of {"input", "sql_query"} objects
        file: PathBuf,
        /// Target index (defaults to retrieval.examples_index)
        #[arg(long)]
        index: Option<String>,
        /// Delete the index first if it exists
        #[arg(long)]
        recreate: bool,
    },
    /// Permanently delete an index
    DeleteIndex {
        /// Index name
        name: String,
    },
    /// Show whether the configured indices exist
    Status,
    /// Print the retrieval context for a question
    Query {
        /// Natural-language question
        question: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config_dir)?;

    if let Commands::Config = cli.command {
        show_config(&config)?;
        return Ok(());
    }

    let factory = VectorStoreFactory::from_config(&config)?;

    match cli.command {
        Commands::Config => {}
        Commands::IngestSchema {
            dirs,
            index,
            recreate,
        } => {
            ingest_schema(&config, &factory, &dirs, index.as_deref(), recreate).await?;
        }
        Commands::IngestExamples {
            file,
            index,
            recreate,
        } => {
            ingest_examples(&config, &factory, &file, index.as_deref(), recreate).await?;
        }
        Commands::DeleteIndex { name } => {
            delete_index(&factory, &name).await?;
        }
        Commands::Status => {
            show_status(&config, &factory).await?;
        }
        Commands::Query { question } => {
            query(&config, factory, &question).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn status_command() {
        let cli = Cli::try_parse_from(["nl2sql-rag", "status"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Status));
            assert_eq!(parsed.config_dir, None);
        }
    }

    #[test]
    fn ingest_schema_with_multiple_dirs() {
        let cli = Cli::try_parse_from([
            "nl2sql-rag",
            "ingest-schema",
            "docs/schema",
            "docs/views",
            "--index",
            "warehouse_schema",
            "--recreate",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::IngestSchema {
                dirs,
                index,
                recreate,
            } = parsed.command
            {
                assert_eq!(
                    dirs,
                    vec![PathBuf::from("docs/schema"), PathBuf::from("docs/views")]
                );
                assert_eq!(index.as_deref(), Some("warehouse_schema"));
                assert!(recreate);
            } else {
                panic!("expected ingest-schema");
            }
        }
    }

    #[test]
    fn ingest_schema_requires_a_directory() {
        let cli = Cli::try_parse_from(["nl2sql-rag", "ingest-schema"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        }
    }

    #[test]
    fn ingest_examples_defaults() {
        let cli = Cli::try_parse_from(["nl2sql-rag", "ingest-examples", "examples.json"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::IngestExamples {
                file,
                index,
                recreate,
            } = parsed.command
            {
                assert_eq!(file, PathBuf::from("examples.json"));
                assert_eq!(index, None);
                assert!(!recreate);
            } else {
                panic!("expected ingest-examples");
            }
        }
    }

    #[test]
    fn global_config_dir_after_subcommand() {
        let cli = Cli::try_parse_from([
            "nl2sql-rag",
            "query",
            "show me customers",
            "--config-dir",
            "/tmp/rag",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert_eq!(parsed.config_dir, Some(PathBuf::from("/tmp/rag")));
            if let Commands::Query { question } = parsed.command {
                assert_eq!(question, "show me customers");
            } else {
                panic!("expected query");
            }
        }
    }

    #[test]
    fn delete_index_requires_name() {
        let cli = Cli::try_parse_from(["nl2sql-rag", "delete-index"]);
        assert!(cli.is_err());
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["nl2sql-rag", "serve"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["nl2sql-rag", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}

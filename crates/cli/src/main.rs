use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use filestore_protocol::{Client, Locator, Response, Status};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::AsyncWriteExt;

#[derive(Parser)]
#[command(name = "filestore")]
#[command(about = "Client for the filestore server")]
struct Cli {
    /// Server address
    #[arg(long, global = true, default_value = "127.0.0.1:23456")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a file
    Get {
        #[command(flatten)]
        target: Target,
        /// Write the content here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Upload a file
    Put {
        /// Local file to upload
        path: PathBuf,
        /// Name to store it under (the server picks one if empty)
        #[arg(long = "as")]
        name: Option<String>,
    },
    /// Delete a file
    Delete {
        #[command(flatten)]
        target: Target,
    },
    /// Flush the index and stop the server
    Shutdown {
        /// Admin token configured on the server
        #[arg(long, env = "FILESTORE_ADMIN_TOKEN")]
        token: String,
    },
}

/// A stored file, addressed by exactly one of name or id.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct Target {
    /// Stored file name
    #[arg(long)]
    name: Option<String>,
    /// Numeric file id
    #[arg(long)]
    id: Option<String>,
}

impl Target {
    fn into_locator(self) -> Locator {
        match (self.name, self.id) {
            (Some(name), _) => Locator::ByName(name),
            (None, Some(id)) => Locator::ById(id),
            // Unreachable while the group is required.
            (None, None) => Locator::ByName(String::new()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut client = Client::connect(&cli.addr)
        .await
        .with_context(|| format!("cannot connect to {}", cli.addr))?;

    let response = match cli.command {
        Commands::Get { target, out } => {
            let response = client.get(target.into_locator()).await?;
            if let Response::Content(content) = &response {
                match out {
                    Some(path) => {
                        tokio::fs::write(&path, content)
                            .await
                            .with_context(|| format!("cannot write {}", path.display()))?;
                        println!("Saved {} bytes to {}", content.len(), path.display());
                    }
                    None => {
                        let mut stdout = tokio::io::stdout();
                        stdout.write_all(content).await?;
                        stdout.flush().await?;
                    }
                }
            }
            response
        }
        Commands::Put { path, name } => {
            let content = tokio::fs::read(&path)
                .await
                .with_context(|| format!("cannot read {}", path.display()))?;
            let response = client.put(name.as_deref().unwrap_or(""), &content).await?;
            if let Response::Created(id) = &response {
                println!("Stored with id {}", id);
            }
            response
        }
        Commands::Delete { target } => {
            let response = client.delete(target.into_locator()).await?;
            if response == Response::Done {
                println!("Deleted");
            }
            response
        }
        Commands::Shutdown { token } => {
            let response = client.terminate(&token).await?;
            if response == Response::Done {
                println!("Server is shutting down");
            }
            response
        }
    };

    match response.status() {
        Status::Ok => Ok(ExitCode::SUCCESS),
        status => {
            eprintln!("Server refused the request: {}", describe(status));
            Ok(ExitCode::FAILURE)
        }
    }
}

fn describe(status: Status) -> String {
    let meaning = match status {
        Status::Ok => "ok",
        Status::BadRequest => "bad request",
        Status::Forbidden => "forbidden",
        Status::NotFound => "not found",
    };
    format!("{} ({})", status, meaning)
}

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "packagebug")]
#[command(about = "Fetches bug reports for queued packages", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the dispatcher until Ctrl+C or SIGTERM
    Run,
    /// Push a raw `id,host,owner,repo` message onto the local queue.
    /// Refused while `run` holds the queue.
    Enqueue(EnqueueArgs),
    /// Print stored cache tokens. Refused while `run` holds the store.
    Token(TokenArgs),
}

#[derive(clap::Args, Debug)]
pub struct EnqueueArgs {
    /// Message body, e.g. `42,github.com,pyk,byten`
    pub message: String,
}

#[derive(clap::Args, Debug)]
pub struct TokenArgs {
    /// Package path `host/owner/repo`; all tokens when omitted
    pub path: Option<String>,
}

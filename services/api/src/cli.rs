use crate::demo::{run_demo, DemoArgs};
use crate::links::{
    run_commission_statement, run_share_decode, run_share_encode, CommissionStatementArgs,
    ShareDecodeArgs, ShareEncodeArgs,
};
use crate::server;
use clap::{Args, Parser, Subcommand};
use sale_desk::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Sale Desk",
    about = "Draft, share and finalize real-estate sale records from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Encode or inspect share-link tokens
    Share {
        #[command(subcommand)]
        command: ShareCommand,
    },
    /// Commission reporting for a shared record
    Commission {
        #[command(subcommand)]
        command: CommissionCommand,
    },
    /// Walk a record from empty draft to signed contract against in-memory services
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum ShareCommand {
    /// Encode a sale record JSON file into a share token
    Encode(ShareEncodeArgs),
    /// Decode a share token and print the record it carries
    Decode(ShareDecodeArgs),
}

#[derive(Subcommand, Debug)]
enum CommissionCommand {
    /// Print the commission split carried by a share token as CSV
    Statement(CommissionStatementArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Share {
            command: ShareCommand::Encode(args),
        } => run_share_encode(args),
        Command::Share {
            command: ShareCommand::Decode(args),
        } => run_share_decode(args),
        Command::Commission {
            command: CommissionCommand::Statement(args),
        } => run_commission_statement(args),
        Command::Demo(args) => run_demo(args).await,
    }
}

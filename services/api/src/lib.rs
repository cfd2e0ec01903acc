mod cli;
mod demo;
mod infra;
mod links;
mod routes;
mod server;

use sale_desk::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}

use clap::Args;
use sale_desk::error::AppError;
use sale_desk::workflows::sale::{statement_csv, SaleRecord, ShareLinkParams, ShareTokenCodec};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct ShareEncodeArgs {
    /// Sale record serialized as JSON
    pub(crate) path: PathBuf,
}

#[derive(Args, Debug)]
pub(crate) struct ShareDecodeArgs {
    /// Token taken from a shared link, percent-encoded or not
    pub(crate) token: String,
}

#[derive(Args, Debug)]
pub(crate) struct CommissionStatementArgs {
    /// Share token carrying the record whose split should be exported
    pub(crate) token: String,
}

pub(crate) fn run_share_encode(args: ShareEncodeArgs) -> Result<(), AppError> {
    let raw = std::fs::read_to_string(&args.path)?;
    let (token, query) = share_query(&raw)?;
    println!("token: {token}");
    println!("query: ?{query}");
    Ok(())
}

pub(crate) fn run_share_decode(args: ShareDecodeArgs) -> Result<(), AppError> {
    let record = ShareTokenCodec::default().decode(&args.token)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub(crate) fn run_commission_statement(args: CommissionStatementArgs) -> Result<(), AppError> {
    print!("{}", statement_for_token(&args.token)?);
    Ok(())
}

/// Token plus the query string a recipient would open.
fn share_query(raw: &str) -> Result<(String, String), AppError> {
    let record: SaleRecord = serde_json::from_str(raw)?;
    let token = ShareTokenCodec::default().encode(&record)?;
    let params = ShareLinkParams {
        id: record.id.as_ref().map(|id| id.0.clone()),
        link: true,
        token: Some(token.clone()),
    };
    Ok((token, params.to_query()))
}

fn statement_for_token(token: &str) -> Result<String, AppError> {
    let record = ShareTokenCodec::default().decode(token)?;
    Ok(statement_csv(&record.commission)?)
}

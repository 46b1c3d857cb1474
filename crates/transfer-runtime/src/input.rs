//! Two-column `mint,recipient` record parsing

use crate::{address::validate_address, Result, TransferError, TransferRequest};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};
use tracing::{debug, info, warn};

/// Column names that mark a header row
const HEADER_TOKENS: [&str; 2] = ["mint", "recipient"];

/// A row excluded from the batch
#[derive(Debug)]
pub struct RejectedRow {
    /// One-based line number
    pub line: usize,
    pub content: String,
    pub error: TransferError,
}

/// Parsed input: accepted requests in file order plus rejected rows
#[derive(Debug, Default)]
pub struct ParsedInput {
    pub requests: Vec<TransferRequest>,
    pub rejected: Vec<RejectedRow>,
    pub headers_skipped: usize,
}

/// Read and validate a record file.
pub fn read_requests(path: &Path) -> Result<ParsedInput> {
    info!("Reading and validating addresses from {}", path.display());
    let file = File::open(path)?;
    parse_requests(BufReader::new(file))
}

/// Parse records from any buffered reader.
pub fn parse_requests<R: BufRead>(reader: R) -> Result<ParsedInput> {
    let mut parsed = ParsedInput::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();

        if is_header(&fields) {
            debug!("Skipping header row at line {}", line_no);
            parsed.headers_skipped += 1;
            continue;
        }

        match parse_row(&fields) {
            Ok(request) => parsed.requests.push(request),
            Err(error) => {
                warn!("Rejecting line {}: {}", line_no, error);
                parsed.rejected.push(RejectedRow {
                    line: line_no,
                    content: line.clone(),
                    error,
                });
            }
        }
    }

    info!(
        "Batch transfer file processed: {} accepted, {} rejected",
        parsed.requests.len(),
        parsed.rejected.len()
    );
    Ok(parsed)
}

fn is_header(fields: &[&str]) -> bool {
    fields
        .iter()
        .take(2)
        .any(|field| HEADER_TOKENS.contains(field))
}

fn parse_row(fields: &[&str]) -> Result<TransferRequest> {
    let [mint, recipient] = fields else {
        return Err(TransferError::InvalidAddress {
            input: fields.join(","),
            reason: format!("expected 2 fields, found {}", fields.len()),
        });
    };
    Ok(TransferRequest::new(
        validate_address(mint)?,
        validate_address(recipient)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::pubkey::Pubkey;

    #[test]
    fn test_header_in_either_column_is_skipped() {
        let (a, b) = (Pubkey::new_unique(), Pubkey::new_unique());
        let data = format!("mint,recipient\n{a},{b}\naddress,recipient\n");
        let parsed = parse_requests(data.as_bytes()).unwrap();

        assert_eq!(parsed.headers_skipped, 2);
        assert_eq!(parsed.requests, vec![TransferRequest::new(a, b)]);
        assert!(parsed.rejected.is_empty());
    }

    #[test]
    fn test_header_token_must_match_whole_field() {
        let data = "minted,recipients\n";
        let parsed = parse_requests(data.as_bytes()).unwrap();
        assert_eq!(parsed.headers_skipped, 0);
        assert_eq!(parsed.rejected.len(), 1);
    }
}

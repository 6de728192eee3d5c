use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Init,
    ShowForm,
    Authorize,
    Confirm,
    Cancel,
    Check,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Init => "init",
            OperationKind::ShowForm => "show_form",
            OperationKind::Authorize => "authorize",
            OperationKind::Confirm => "confirm",
            OperationKind::Cancel => "cancel",
            OperationKind::Check => "check",
        };
        f.write_str(name)
    }
}

/// One row of an operations file: `op,team,order,amount,currency,pan,expiry,cvv`.
///
/// Columns an operation does not use may be empty or left off.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Operation {
    pub op: OperationKind,
    pub team: String,
    pub order: String,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub pan: Option<String>,
    pub expiry: Option<String>,
    pub cvv: Option<String>,
}

/// Reads operations from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// and yields rows lazily so large files stream.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn operations(self) -> impl Iterator<Item = Result<Operation>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_valid_stream() {
        let data = "op, team, order, amount, currency, pan, expiry, cvv\n\
                    init, demo, order-1, 150000, RUB\n\
                    authorize, demo, order-1, , , 4111 1111 1111 1111, 12/30, 123\n\
                    confirm, demo, order-1, 150000\n\
                    check, demo, order-1";
        let ops: Vec<Operation> = OperationReader::new(data.as_bytes())
            .operations()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(ops.len(), 4);
        assert_eq!(ops[0].op, OperationKind::Init);
        assert_eq!(ops[0].amount, Some(150_000));
        assert_eq!(ops[0].currency.as_deref(), Some("RUB"));
        assert_eq!(ops[1].amount, None);
        assert_eq!(ops[1].expiry.as_deref(), Some("12/30"));
        assert_eq!(ops[3].op, OperationKind::Check);
        assert_eq!(ops[3].pan, None);
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "op, team, order, amount\nrefund, demo, order-1, 10\ninit, demo, order-2, ten";
        let results: Vec<Result<Operation>> =
            OperationReader::new(data.as_bytes()).operations().collect();

        assert!(matches!(results[0], Err(PaymentError::Csv(_))));
        assert!(results[1].is_err());
    }
}

use super::operation_reader::OperationKind;
use crate::domain::payment::PaymentStatus;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// One output row: `op,team,order,payment_id,status,error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    pub op: OperationKind,
    pub team: String,
    pub order: String,
    pub payment_id: Option<String>,
    pub status: Option<PaymentStatus>,
    /// Stable error code; empty on success.
    pub error: Option<&'static str>,
}

pub struct ResultWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ResultWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write(&mut self, result: &OperationResult) -> Result<()> {
        self.writer.serialize(result)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

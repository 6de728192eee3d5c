//! CSV surface of the batch driver.

pub mod operation_reader;
pub mod result_writer;

//! # Sheet Mapper
//!
//! Maps the rows of a spreadsheet sheet onto records of a caller-declared type.
//!
//! A record type binds its fields to column headers, either with
//! [`impl_record!`] or by implementing [`Record`] by hand. The mapper reads the
//! header row of the requested sheet, matches header titles to fields and
//! builds one record per row below it, converting every cell to the type of
//! its field.
//!
//! ## Features
//!
//! - **Two container formats**: Office Open XML (`.xlsx`) and legacy BIFF8
//!   (`.xls`) workbooks, chosen by file extension
//! - **Typed fields**: `bool`, `i8`, `i16`, `i32`, `i64`, `f32`, `f64`,
//!   `String`, `chrono::NaiveDateTime`, `rust_decimal::Decimal` and `Option`s of them
//! - **One record per row**: blank and missing rows still produce default records
//! - **Configurable failure handling**: abort, skip the row or skip the cell
//! - **Pure Rust implementation**: no native spreadsheet libraries
//!
//! ## Example
//!
//! ```no_run
//! #[derive(Default)]
//! struct Order {
//!     id: i64,
//!     customer: String,
//!     total: f64,
//! }
//!
//! sheet_mapper::impl_record!(Order {
//!     id => "Order Id",
//!     customer => "Customer",
//!     total => "Total",
//! });
//!
//! let orders: Option<Vec<Order>> = sheet_mapper::parse("orders.xlsx", "Sheet1", sheet_mapper::DEFAULT_START_ROW)?;
//! # Ok::<(), sheet_mapper::SheetMapperError>(())
//! ```
mod error;
mod helpers;
pub mod mapper;
pub mod spreadsheet;

pub use crate::error::SheetMapperError;
pub use crate::mapper::field::FieldDescriptor;
pub use crate::mapper::field::FieldType;
pub use crate::mapper::field::FieldValue;
pub use crate::mapper::field::FieldValueError;
pub use crate::mapper::field::FromFieldValue;
pub use crate::mapper::field::Record;
pub use crate::mapper::parse;
pub use crate::mapper::BlankCellPolicy;
pub use crate::mapper::RowErrorPolicy;
pub use crate::mapper::SheetMapper;
pub use crate::mapper::DEFAULT_DATE_FORMAT;
pub use crate::mapper::DEFAULT_SHEET_NAME;
pub use crate::mapper::DEFAULT_START_ROW;
pub use crate::mapper::LEGACY_DATE_FORMAT;
pub use crate::spreadsheet::open_workbook;
pub use crate::spreadsheet::Workbook;

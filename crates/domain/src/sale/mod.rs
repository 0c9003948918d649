//! Sale aggregate and related types.

mod aggregate;
mod invoice;
mod report;
mod state;

pub use aggregate::{Closure, NewSale, Sale, SaleLine, SaleLineItem, SaleSnapshot};
pub use invoice::InvoiceNumber;
pub use report::SalesReport;
pub use state::SaleState;

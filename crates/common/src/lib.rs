//! Shared identifiers and value types.
//!
//! Every crate in the workspace speaks in these types: typed UUID identifiers
//! for each entity, integer-cent [`Money`], validated [`Quantity`] and
//! [`Discount`] values, and the [`Clock`] used to stamp timestamps.

mod clock;
mod ids;
mod money;
mod quantity;

pub use clock::{Clock, FixedClock, SystemClock};
pub use ids::{AuditId, ItemId, PaymentId, ReservationId, SaleId};
pub use money::{Discount, DiscountError, Money, MoneyParseError};
pub use quantity::{Quantity, QuantityError};

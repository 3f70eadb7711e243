//! Interactive Brokers Client Portal gateway.

pub mod client;
pub mod orders;

pub use client::{ClientPortal, RequestContext};
pub use orders::{
    CancelOutcome, ConfirmPolicy, OrderExecution, OrderStatus, cancel_all_orders,
    filter_live_orders, place_and_confirm,
};

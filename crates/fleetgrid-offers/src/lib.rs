//! fleetgrid-offers — backend-agnostic instance offer selection.
//!
//! Separates "is this offer usable" from "which usable offer is best":
//! the selector answers the first question deterministically, callers
//! apply their own policy (price, backend preference) for the second.
//!
//! # Components
//!
//! - **`selector`** — requirement matching and smallest-first choice
//! - **`aggregate`** — concurrent fan-out over a project's backends, price ranking

pub mod aggregate;
pub mod selector;

pub use aggregate::{fetch_offers, get_offers_by_requirements, rank_by_price};
pub use selector::{choose_offer, filter_offers, offer_matches, selection_key, sort_offers};

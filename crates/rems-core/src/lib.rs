//! # rems-core
//!
//! Domain types shared by every REMS Intermediary crate.
//!
//! - [`RoutingRecord`] - where hook and ETASU traffic for a medication is sent
//! - [`HookEvent`] / [`HookType`] - the inbound CDS Hooks payload
//! - [`MedicationCoding`] - the drug identity pulled out of a medication resource
//! - [`Card`] / [`CdsResponse`] - the decision-support response returned to the caller
//!
//! This crate performs no I/O.

pub mod card;
pub mod coding;
pub mod error;
pub mod hook;
pub mod routing;

pub use card::{Card, CardSource, CdsResponse, WARNING_INDICATOR};
pub use coding::{medication_orders, MedicationCoding, NDC_SYSTEM, RXNORM_SYSTEM};
pub use error::{CoreError, Result};
pub use hook::{FhirAuthorization, HookEvent, HookType};
pub use routing::{ConnectionKey, LookupStrategy, RoutingRecord, WILDCARD_REQUESTER};

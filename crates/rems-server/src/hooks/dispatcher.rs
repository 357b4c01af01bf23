//! Hook dispatch: classify, extract codings, resolve, hydrate, forward,
//! aggregate.
//!
//! Every path ends in exactly one [`HookOutcome`]. Extraction failures and
//! unsupported hooks become an error card; everything else that goes wrong
//! (no route, denied requester, store or downstream failures) degrades to an
//! empty card list.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::future::join_all;
use indexmap::IndexSet;
use rems_core::{CdsResponse, CoreError, HookEvent, HookType, MedicationCoding, medication_orders};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::hydrator::{FhirServerFetcher, hydrate};
use super::services::PrefetchTemplate;
use crate::proxy::Forwarder;
use crate::resolver::EndpointResolver;

/// Response of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Cards built or merged by this service.
    Cards(CdsResponse),
    /// Single administrator response, relayed verbatim.
    Relayed(Bytes),
}

impl HookOutcome {
    pub fn empty() -> Self {
        Self::Cards(CdsResponse::empty())
    }

    pub fn error(err: &CoreError) -> Self {
        Self::Cards(CdsResponse::error(err.to_string()))
    }
}

impl IntoResponse for HookOutcome {
    fn into_response(self) -> Response {
        match self {
            Self::Cards(cards) => Json(cards).into_response(),
            Self::Relayed(body) => ([(CONTENT_TYPE, "application/json")], body).into_response(),
        }
    }
}

/// Per-dispatch aggregation of a bundle fan-out.
///
/// Owned by a single dispatch and dropped when it responds.
#[derive(Debug, Default)]
pub struct AggregationState {
    /// Order entries whose resolution has completed.
    pub resolved_orders: usize,
    /// Unique forward URLs, in first-seen order.
    pub targets: IndexSet<String>,
    pub cards: Vec<Value>,
}

/// Settings for hydrating prefetch against the caller's server.
#[derive(Debug, Clone)]
pub struct HydrationSettings {
    pub client: reqwest::Client,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct HookDispatcher {
    resolver: EndpointResolver,
    forwarder: Forwarder,
    hydration: Option<HydrationSettings>,
}

pub type SharedDispatcher = Arc<HookDispatcher>;

impl HookDispatcher {
    pub fn new(
        resolver: EndpointResolver,
        forwarder: Forwarder,
        hydration: Option<HydrationSettings>,
    ) -> Self {
        Self {
            resolver,
            forwarder,
            hydration,
        }
    }

    #[instrument(skip_all, fields(hook = %event.hook, hook_instance = ?event.hook_instance))]
    pub async fn dispatch(&self, event: HookEvent, template: &PrefetchTemplate) -> HookOutcome {
        let hook = match event.hook_type() {
            Ok(hook) => hook,
            Err(e) => {
                info!(error = %e, "Rejecting hook event");
                return HookOutcome::error(&e);
            }
        };

        if hook.requires_draft_order() {
            self.dispatch_single(hook, event, template).await
        } else {
            self.dispatch_bundle(hook, event, template).await
        }
    }

    /// Order-select and order-sign: one medication from the draft order.
    async fn dispatch_single(
        &self,
        hook: HookType,
        mut event: HookEvent,
        template: &PrefetchTemplate,
    ) -> HookOutcome {
        let Some(coding) = draft_order_coding(hook, &event.context) else {
            let err = CoreError::no_medication(format!("no medication in {hook} draft order"));
            info!(error = %err, "Rejecting hook event");
            return HookOutcome::error(&err);
        };

        let Some(record) = self.resolver.resolve(&coding, event.requester()).await else {
            debug!(code = %coding.code, system = %coding.system, "No route, returning no cards");
            return HookOutcome::empty();
        };

        self.hydrate_event(&mut event, template).await;
        event.strip_credentials();
        let Some(body) = encode(&event) else {
            return HookOutcome::empty();
        };

        let url = record.hook_url(hook);
        match self.forwarder.forward(&url, body).await {
            Ok(response) => {
                info!(url = %url, "Relayed administrator response");
                HookOutcome::Relayed(response)
            }
            Err(e) => {
                warn!(url = %url, kind = e.kind(), error = %e, "Forward failed, returning no cards");
                HookOutcome::empty()
            }
        }
    }

    /// Patient-view and encounter-start: fan out over the prefetched orders.
    async fn dispatch_bundle(
        &self,
        hook: HookType,
        mut event: HookEvent,
        template: &PrefetchTemplate,
    ) -> HookOutcome {
        self.hydrate_event(&mut event, template).await;

        let codings: Vec<Option<MedicationCoding>> = event
            .prefetch_bundles()
            .flat_map(|bundle| {
                medication_orders(bundle)
                    .into_iter()
                    .map(move |order| MedicationCoding::from_order_in_bundle(order, bundle))
            })
            .collect();
        if codings.is_empty() {
            debug!("No orders in prefetch, returning no cards");
            return HookOutcome::empty();
        }

        let mut state = AggregationState::default();
        let requester = event.requester();
        let resolutions = join_all(codings.iter().map(|coding| async move {
            match coding {
                Some(coding) => self.resolver.resolve(coding, requester).await,
                None => None,
            }
        }))
        .await;
        for record in resolutions {
            state.resolved_orders += 1;
            if let Some(record) = record {
                state.targets.insert(record.hook_url(hook));
            }
        }

        if state.targets.is_empty() {
            debug!(orders = state.resolved_orders, "No order resolved to a route");
            return HookOutcome::empty();
        }

        event.strip_credentials();
        let Some(body) = encode(&event) else {
            return HookOutcome::empty();
        };

        let forwards = join_all(state.targets.iter().map(|url| {
            let body = body.clone();
            async move { (url, self.forwarder.forward_cards(url, body).await) }
        }))
        .await;
        for (url, result) in forwards {
            match result {
                Ok(cards) => {
                    debug!(url = %url, cards = cards.len(), "Collected cards");
                    state.cards.extend(cards);
                }
                Err(e) => {
                    warn!(url = %url, kind = e.kind(), error = %e, "Forward failed, skipping target");
                }
            }
        }

        info!(
            orders = state.resolved_orders,
            targets = state.targets.len(),
            cards = state.cards.len(),
            "Merged administrator cards"
        );
        HookOutcome::Cards(CdsResponse::from_cards(state.cards))
    }

    /// Replaces `event.prefetch` with the hydrated map when the caller
    /// granted a credential.
    async fn hydrate_event(&self, event: &mut HookEvent, template: &PrefetchTemplate) {
        let Some(settings) = &self.hydration else {
            return;
        };
        let Some((server, token)) = event.credential() else {
            return;
        };
        let fetcher = FhirServerFetcher::new(settings.client.clone(), server, token, settings.timeout);
        if let Some(prefetch) = hydrate(&fetcher, template, event).await {
            event.prefetch = Some(prefetch);
        }
    }
}

fn encode(event: &HookEvent) -> Option<Bytes> {
    match serde_json::to_vec(event) {
        Ok(body) => Some(Bytes::from(body)),
        Err(e) => {
            warn!(error = %e, "Failed to encode hook event");
            None
        }
    }
}

/// Coding of the draft order a hook is about.
///
/// Order-select targets the order named by the first selection, falling back
/// to the first draft order; order-sign uses the first draft order.
pub fn draft_order_coding(hook: HookType, context: &Value) -> Option<MedicationCoding> {
    let draft_orders = context.get("draftOrders")?;
    let entries = draft_orders.get("entry")?.as_array()?;
    let resources = entries.iter().filter_map(|e| e.get("resource"));

    let selected = match hook {
        HookType::OrderSelect => context
            .get("selections")
            .and_then(Value::as_array)
            .and_then(|s| s.first())
            .and_then(Value::as_str)
            .and_then(|selection| {
                resources.clone().find(|resource| {
                    let rt = resource.get("resourceType").and_then(Value::as_str);
                    let id = resource.get("id").and_then(Value::as_str);
                    matches!((rt, id), (Some(rt), Some(id)) if selection == format!("{rt}/{id}"))
                })
            }),
        _ => None,
    };

    let order = selected.or_else(|| resources.clone().next())?;
    MedicationCoding::from_order_in_bundle(order, draft_orders)
}

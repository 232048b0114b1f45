// SPDX-License-Identifier: GPL-2.0-or-later

//! Packaging of raw responses into internal events.
//!
//! An event is an append-only mapping handed to the operator engine for
//! matching and extraction. The creator is stateless; the merge order is
//! fixed so later layers (payloads, captures) win over response fields.

use std::net::IpAddr;

use crate::vars::Variables;

/// The event mapping handed to the operator engine.
pub type InternalEvent = Variables;

/// One request/response pair plus room for operator results.
#[derive(Debug, Clone, Default)]
pub struct WrappedEvent {
    pub internal: InternalEvent,
    /// Filled by the operator engine after matching/extraction.
    pub operator_results: Option<Variables>,
    /// The event correlates with out-of-band interactions and is
    /// completed asynchronously.
    pub uses_interactsh: bool,
}

/// Everything that flows into one event.
pub struct EventParts<'a> {
    /// Response derived fields (request/response dump, status, matched
    /// address).
    pub response: Variables,
    pub template_ctx: &'a Variables,
    pub previous: &'a Variables,
    pub payload: &'a Variables,
    pub captures: &'a Variables,
    /// Peer IP the request was actually dialed to.
    pub ip: Option<IpAddr>,
    pub stop_at_first_match: bool,
}

/// Builds the event mapping for one request/response pair.
pub fn create_event(parts: EventParts) -> WrappedEvent {
    let mut internal = Variables::merged(&[
        &parts.response,
        parts.template_ctx,
        parts.previous,
        parts.payload,
        parts.captures,
    ]);
    if let Some(ip) = parts.ip {
        internal.insert("ip", ip.to_string());
    }
    if parts.stop_at_first_match {
        internal.insert("stop-at-first-match", true);
    }
    WrappedEvent {
        internal,
        operator_results: None,
        uses_interactsh: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::VarValue;

    #[test]
    fn merge_order_is_response_ctx_previous_payload_captures() {
        let response: Variables = [("k", "response"), ("status", "200")].into_iter().collect();
        let ctx: Variables = [("k", "ctx")].into_iter().collect();
        let previous: Variables = [("k", "previous")].into_iter().collect();
        let payload: Variables = [("k", "payload")].into_iter().collect();
        let captures: Variables = [("k", "capture")].into_iter().collect();
        let event = create_event(EventParts {
            response,
            template_ctx: &ctx,
            previous: &previous,
            payload: &payload,
            captures: &captures,
            ip: None,
            stop_at_first_match: false,
        });
        assert_eq!(event.internal.get("k").unwrap().to_string(), "capture");
        assert_eq!(event.internal.get("status").unwrap().to_string(), "200");
    }

    #[test]
    fn ip_and_stop_flag_are_attached() {
        let empty = Variables::new();
        let event = create_event(EventParts {
            response: Variables::new(),
            template_ctx: &empty,
            previous: &empty,
            payload: &empty,
            captures: &empty,
            ip: Some("10.0.0.1".parse().unwrap()),
            stop_at_first_match: true,
        });
        assert_eq!(event.internal.get("ip").unwrap().to_string(), "10.0.0.1");
        assert_eq!(
            event.internal.get("stop-at-first-match"),
            Some(&VarValue::Bool(true))
        );
    }
}

// SPDX-License-Identifier: GPL-2.0-or-later

//! Raw TCP protocol request execution.
//!
//! A network template describes a conversation: a sequence of inputs
//! written to the connection, each optionally followed by a sized read
//! whose bytes can be captured into a named variable for later inputs
//! and the emitted event. Multi-port templates are filtered through the
//! open-port scan first; identical `(address, tls)` pairs are probed
//! once per execution unless clustering is disabled.

mod ports;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::models::{NetworkInputKind, NetworkRequest, Protocol, Target};
use crate::vars::{self, Variables};

use super::{
    cancelled, create_event, utils, CancelToken, EventParts, ExecutorOptions, MultiError,
    OastRequest, RequestError, RequestResult, WrappedEvent,
};

/// Executes a network template request against targets.
pub struct NetworkExecutor {
    pub request: NetworkRequest,
    pub options: ExecutorOptions,
}

impl NetworkExecutor {
    pub fn new(request: NetworkRequest, options: ExecutorOptions) -> Arc<Self> {
        Arc::new(Self { request, options })
    }

    /// Executes the request and streams result envelopes; the channel
    /// closes exactly once, after the worker pool has drained.
    pub fn execute_with_results(
        self: &Arc<Self>,
        target: &Target,
        previous: &Variables,
        cancel: CancelToken,
    ) -> mpsc::Receiver<RequestResult> {
        let (tx, rx) = mpsc::channel(1);
        let executor = self.clone();
        let target = target.clone();
        let previous = previous.clone();
        tokio::spawn(async move {
            if let Err(e) = executor.run(&target, &previous, cancel, tx.clone()).await {
                let _ = tx.send(RequestResult::Error(e)).await;
            }
        });
        rx
    }

    async fn run(
        self: Arc<Self>,
        target: &Target,
        previous: &Variables,
        cancel: CancelToken,
        tx: mpsc::Sender<RequestResult>,
    ) -> Result<(), RequestError> {
        let mut visited = HashSet::new();
        let mut errors = MultiError::new();
        if self.request.ports.is_empty() {
            self.execute_on_target(target, &mut visited, previous, &cancel, &tx, &mut errors)
                .await?;
        } else {
            let ports = ports::open_ports(&self.request, target, &self.options).await?;
            for port in ports {
                let mut input = target.clone();
                if let Err(reason) = input.use_network_port(port, &self.request.exclude_ports) {
                    debug!(port, reason = %reason, "could not apply network port");
                }
                self.execute_on_target(&input, &mut visited, previous, &cancel, &tx, &mut errors)
                    .await?;
            }
        }
        errors.into_result()
    }

    async fn execute_on_target(
        self: &Arc<Self>,
        input: &Target,
        visited: &mut HashSet<(String, bool)>,
        previous: &Variables,
        cancel: &CancelToken,
        tx: &mpsc::Sender<RequestResult>,
        errors: &mut MultiError,
    ) -> Result<(), RequestError> {
        let address = if self.request.self_contained {
            String::new()
        } else {
            match utils::get_address(&input.address()) {
                Ok(address) => address,
                Err(e) => {
                    self.options.output.request(
                        &self.options.template_path,
                        &input.input,
                        Protocol::Network,
                        Some(&e),
                    );
                    self.options.progress.increment_failed_requests_by(1);
                    return Err(e);
                }
            }
        };
        let base = Variables::merged(&[
            &utils::generate_address_variables(&address),
            &input.template_ctx,
        ]);
        let evaluated = self.options.evaluate_variables(&base);
        let variables = Variables::merged(&[&evaluated, &base, &self.options.constants]);

        for entry in &self.request.addresses {
            let actual = vars::replace(&entry.address, &variables);
            let seen = !visited.insert((actual.clone(), entry.tls));
            if seen && !self.options.options.disable_clustering {
                continue;
            }
            if let Err(e) = self
                .execute_address(&variables, &actual, &address, input, entry.tls, previous, cancel, tx)
                .await
            {
                // the attempt still surfaces downstream as an event with
                // an empty response
                let mut response = Variables::new();
                response.insert("host", address.clone());
                let _ = tx
                    .send(RequestResult::Event(create_event(EventParts {
                        response,
                        template_ctx: &input.template_ctx,
                        previous,
                        payload: &Variables::new(),
                        captures: &Variables::new(),
                        ip: None,
                        stop_at_first_match: false,
                    })))
                    .await;
                warn!(
                    template = %self.options.template_id,
                    address = %actual,
                    error = %e,
                    "could not make network request"
                );
                errors.push(e);
                continue;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_address(
        self: &Arc<Self>,
        variables: &Variables,
        actual: &str,
        address: &str,
        input: &Target,
        tls: bool,
        previous: &Variables,
        cancel: &CancelToken,
        tx: &mpsc::Sender<RequestResult>,
    ) -> Result<(), RequestError> {
        let mut variables = variables.clone();
        variables.insert("Hostname", address);
        let cli_payloads = self.options.options.vars.clone();

        if !actual.contains(':') {
            let e = RequestError::Configuration(
                "no port provided in network protocol request".to_string(),
            );
            self.options.output.request(
                &self.options.template_path,
                address,
                Protocol::Network,
                Some(&e),
            );
            self.options.progress.increment_failed_requests_by(1);
            return Err(e);
        }

        if !self.request.payloads.is_empty() {
            let iterator = self.request.payloads.iterator()?;
            let (pool, follow_global) = self.options.pool_for(self.request.threads);
            let errors = Arc::new(Mutex::new(MultiError::new()));
            let mut workers = JoinSet::new();
            for payload in iterator {
                self.options.resize_checkpoint(&pool, follow_global);
                let merged = Variables::merged(&[&payload, &cli_payloads]);
                let permit = pool.acquire().await;
                let executor = self.clone();
                let variables = variables.clone();
                let actual = actual.to_string();
                let input = input.clone();
                let previous = previous.clone();
                let errors = errors.clone();
                let tx = tx.clone();
                let cancel = cancel.clone();
                workers.spawn(async move {
                    let _permit = permit;
                    match executor
                        .execute_request_with_payloads(
                            &variables, &actual, &input, tls, merged, &previous, &cancel,
                        )
                        .await
                    {
                        Ok(Some(event)) => {
                            let _ = tx.send(RequestResult::Event(event)).await;
                        }
                        Ok(None) => {}
                        Err(e) => errors.lock().unwrap().push(e),
                    }
                });
            }
            while workers.join_next().await.is_some() {}
            Arc::into_inner(errors)
                .map(|m| m.into_inner().unwrap())
                .unwrap_or_default()
                .into_result()
        } else {
            let event = self
                .execute_request_with_payloads(
                    &variables,
                    actual,
                    input,
                    tls,
                    cli_payloads,
                    previous,
                    cancel,
                )
                .await?;
            if let Some(event) = event {
                let _ = tx.send(RequestResult::Event(event)).await;
            }
            Ok(())
        }
    }

    /// Runs the full input conversation for one payload variant.
    async fn execute_request_with_payloads(
        &self,
        variables: &Variables,
        actual: &str,
        input: &Target,
        tls: bool,
        mut payloads: Variables,
        previous: &Variables,
        cancel: &CancelToken,
    ) -> Result<Option<WrappedEvent>, RequestError> {
        if cancelled(cancel) {
            return Err(RequestError::Cancelled);
        }
        let hostname = actual
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| actual.to_string());

        self.options.rate_limiter.take().await;
        let mut conn = match self.options.dialer.dial_addr(actual, tls).await {
            Ok(conn) => conn,
            Err(e) => {
                let e = RequestError::from(e);
                self.options.output.request(
                    &self.options.template_path,
                    actual,
                    Protocol::Network,
                    Some(&e),
                );
                self.options.progress.increment_failed_requests_by(1);
                return Err(e);
            }
        };

        let mut interim = Variables::merged(&[variables, &payloads]);
        let mut interactsh_urls = Vec::new();
        let mut request_bytes = Vec::new();
        let mut response_bytes = Vec::new();
        let mut captures = Variables::new();

        for input_def in &self.request.inputs {
            if cancelled(cancel) {
                return Err(RequestError::Cancelled);
            }
            let mut data = input_def.data.clone().into_bytes();
            if let Some(oast) = &self.options.interactsh {
                let (rewritten, urls) =
                    oast.replace(&String::from_utf8_lossy(&data), interactsh_urls);
                data = rewritten.into_bytes();
                interactsh_urls = urls;
            }
            let final_data = match vars::evaluate_bytes(&data, &interim) {
                Ok(data) => data,
                Err(e) => {
                    let e = RequestError::from(e);
                    self.report_failure(actual, &e);
                    return Err(e);
                }
            };
            request_bytes.extend_from_slice(&final_data);
            if let Err(e) = vars::contains_unresolved_variables(&String::from_utf8_lossy(&final_data))
            {
                warn!(
                    template = %self.options.template_id,
                    address = %actual,
                    error = %e,
                    "could not make network request"
                );
                let e = RequestError::from(e);
                self.report_failure(actual, &e);
                return Err(e);
            }
            let wire = match input_def.kind {
                NetworkInputKind::Plain => final_data,
                NetworkInputKind::Hex => {
                    match hex::decode(String::from_utf8_lossy(&final_data).trim()) {
                        Ok(decoded) => decoded,
                        Err(e) => {
                            let e = RequestError::Build(format!("invalid hex input: {e}"));
                            self.report_failure(actual, &e);
                            return Err(e);
                        }
                    }
                }
            };
            if let Err(e) = conn.send(&wire).await {
                let e = RequestError::from(e);
                self.report_failure(actual, &e);
                return Err(e);
            }

            if input_def.read > 0 {
                let buffer = conn.read_n_with_timeout(input_def.read, None).await?;
                response_bytes.extend_from_slice(&buffer);
                let text = String::from_utf8_lossy(&buffer).into_owned();
                if let Some(name) = &input_def.name {
                    captures.insert(name.clone(), text.clone());
                    interim.insert(name.clone(), text.clone());
                }
                if let Some(operators) = &self.options.operators {
                    let mut capture = Variables::new();
                    if let Some(name) = &input_def.name {
                        capture.insert(name.clone(), text);
                    }
                    let harvested = operators.execute_internal_extractors(&capture);
                    payloads.extend_from(&harvested);
                }
            }
        }

        self.options.progress.increment_requests();
        if self.options.options.store_response {
            self.options.output.write_store_debug_data(
                actual,
                &self.options.template_id,
                Protocol::Network,
                &hex::encode(&request_bytes),
            );
        }
        self.options
            .output
            .request(&self.options.template_path, actual, Protocol::Network, None);
        debug!(address = %actual, "sent tcp request");

        let final_read = if self.request.read_all {
            conn.read_all_with_timeout(None).await
        } else {
            let size = if self.request.read_size != 0 {
                self.request.read_size
            } else {
                1024
            };
            match conn.read_n_with_timeout(size, None).await {
                Ok(buffer) => buffer,
                Err(e) => {
                    debug!(address = %actual, error = %e, "could not read more data");
                    Vec::new()
                }
            }
        };
        response_bytes.extend_from_slice(&final_read);

        let mut response = Variables::new();
        response.insert(
            "request",
            String::from_utf8_lossy(&request_bytes).into_owned(),
        );
        response.insert("data", String::from_utf8_lossy(&final_read).into_owned());
        response.insert(
            "raw",
            String::from_utf8_lossy(&response_bytes).into_owned(),
        );
        response.insert("host", input.input.clone());
        response.insert("matched", actual);

        let mut event = create_event(EventParts {
            response,
            template_ctx: &input.template_ctx,
            previous,
            payload: &payloads,
            captures: &captures,
            ip: self.options.dialer.dialed_ip(&hostname),
            stop_at_first_match: self.options.stop_at_first_match,
        });

        if !interactsh_urls.is_empty() {
            if let Some(oast) = &self.options.interactsh {
                oast.make_placeholders(&interactsh_urls, &mut event.internal);
                event.uses_interactsh = true;
                oast.request_event(OastRequest {
                    placeholders: interactsh_urls,
                    event,
                });
                return Ok(None);
            }
        }
        Ok(Some(event))
    }

    fn report_failure(&self, address: &str, error: &RequestError) {
        self.options.output.request(
            &self.options.template_path,
            address,
            Protocol::Network,
            Some(error),
        );
        self.options.progress.increment_failed_requests_by(1);
    }
}

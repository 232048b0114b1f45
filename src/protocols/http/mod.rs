// SPDX-License-Identifier: GPL-2.0-or-later

//! HTTP protocol request execution.
//!
//! Each template iteration (a path or a raw blob) is compiled per
//! payload variant and dispatched on the worker pool. Race mode fires
//! the same iteration multiple times behind a shared gate.

mod build;
mod client;
mod race;
mod raw;

pub use build::{GeneratedRequest, RequestBuilder};
pub use client::HttpResponse;
pub use race::OpenGate;

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::models::{HttpRequest, Protocol, Target};
use crate::vars::{self, Variables};

use super::{
    cancelled, create_event, CancelToken, EventParts, ExecutorOptions, MultiError, OastRequest,
    RequestError, RequestResult, WrappedEvent,
};

/// Executes an HTTP template request against targets.
pub struct HttpExecutor {
    pub request: HttpRequest,
    pub options: ExecutorOptions,
}

impl HttpExecutor {
    pub fn new(request: HttpRequest, options: ExecutorOptions) -> Arc<Self> {
        Arc::new(Self { request, options })
    }

    /// Executes all template iterations and streams result envelopes.
    /// The channel closes exactly once, after the worker pool drained.
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
        let mut errors = MultiError::new();
        for data in self.request.iterations() {
            if cancelled(&cancel) {
                errors.push(RequestError::Cancelled);
                break;
            }
            if !self.request.payloads.is_empty() {
                self.run_payloads(target, data, previous, &cancel, &tx, &mut errors)
                    .await?;
            } else if self.request.race && self.request.race_count > 1 {
                self.run_race(target, data, previous, &cancel, &tx, &mut errors)
                    .await;
            } else {
                let result = self
                    .execute_variant(target, data, Variables::new(), previous, None, &cancel)
                    .await;
                self.settle(result, target, previous, &tx, &mut errors).await;
            }
        }
        errors.into_result()
    }

    async fn run_payloads(
        self: &Arc<Self>,
        target: &Target,
        data: &str,
        previous: &Variables,
        cancel: &CancelToken,
        tx: &mpsc::Sender<RequestResult>,
        errors: &mut MultiError,
    ) -> Result<(), RequestError> {
        let iterator = self.request.payloads.iterator()?;
        let (pool, follow_global) = self.options.pool_for(self.request.threads);
        let shared_errors = Arc::new(Mutex::new(MultiError::new()));
        let mut workers = JoinSet::new();
        for payload in iterator {
            self.options.resize_checkpoint(&pool, follow_global);
            let permit = pool.acquire().await;
            let executor = self.clone();
            let target = target.clone();
            let data = data.to_string();
            let previous = previous.clone();
            let shared_errors = shared_errors.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                let _permit = permit;
                let result = executor
                    .execute_variant(&target, &data, payload, &previous, None, &cancel)
                    .await;
                match result {
                    Ok(Some(event)) => {
                        let _ = tx.send(RequestResult::Event(event)).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let _ = tx
                            .send(RequestResult::Event(executor.empty_event(&target, &previous)))
                            .await;
                        shared_errors.lock().unwrap().push(e);
                    }
                }
            });
        }
        while workers.join_next().await.is_some() {}
        if let Some(collected) = Arc::into_inner(shared_errors) {
            if let Err(e) = collected.into_inner().unwrap().into_result() {
                errors.push(e);
            }
        }
        Ok(())
    }

    /// Dispatches `race_count` copies of one iteration behind a shared
    /// gate so their bodies hit the endpoint together.
    async fn run_race(
        self: &Arc<Self>,
        target: &Target,
        data: &str,
        previous: &Variables,
        cancel: &CancelToken,
        tx: &mpsc::Sender<RequestResult>,
        errors: &mut MultiError,
    ) {
        let gate = OpenGate::new(self.request.race_count);
        let mut workers = JoinSet::new();
        for _ in 0..self.request.race_count {
            let executor = self.clone();
            let target = target.clone();
            let data = data.to_string();
            let previous = previous.clone();
            let gate = gate.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                match executor
                    .execute_variant(&target, &data, Variables::new(), &previous, Some(&gate), &cancel)
                    .await
                {
                    Ok(Some(event)) => {
                        let _ = tx.send(RequestResult::Event(event)).await;
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(e) => Err(e),
                }
            });
        }
        while let Some(joined) = workers.join_next().await {
            if let Ok(Err(e)) = joined {
                let _ = tx
                    .send(RequestResult::Event(self.empty_event(target, previous)))
                    .await;
                errors.push(e);
            }
        }
    }

    async fn settle(
        &self,
        result: Result<Option<WrappedEvent>, RequestError>,
        target: &Target,
        previous: &Variables,
        tx: &mpsc::Sender<RequestResult>,
        errors: &mut MultiError,
    ) {
        match result {
            Ok(Some(event)) => {
                let _ = tx.send(RequestResult::Event(event)).await;
            }
            Ok(None) => {}
            Err(e) => {
                let _ = tx
                    .send(RequestResult::Event(self.empty_event(target, previous)))
                    .await;
                errors.push(e);
            }
        }
    }

    /// Compiles and sends one request variant.
    async fn execute_variant(
        &self,
        target: &Target,
        data: &str,
        payload: Variables,
        previous: &Variables,
        gate: Option<&OpenGate>,
        cancel: &CancelToken,
    ) -> Result<Option<WrappedEvent>, RequestError> {
        if cancelled(cancel) {
            return Err(RequestError::Cancelled);
        }
        let builder = RequestBuilder::new(&self.request, &self.options);
        let generated = match builder.make(target, data, payload, previous) {
            Ok(generated) => generated,
            Err(e) => {
                warn!(
                    template = %self.options.template_id,
                    target = %target.input,
                    error = %e,
                    "could not build http request"
                );
                self.report_failure(&target.input, &e);
                return Err(e);
            }
        };

        // refuse to send anything with unresolved placeholders left
        let final_check = format!(
            "{} {}",
            generated.url,
            String::from_utf8_lossy(&generated.body)
        );
        let check_result = match self.request.signature {
            Some(signature) => {
                vars::contains_variables_with_ignore_list(signature.skip_list(), &final_check)
            }
            None => vars::contains_unresolved_variables(&final_check),
        };
        if let Err(e) = check_result {
            warn!(
                template = %self.options.template_id,
                target = %target.input,
                error = %e,
                "skipping request with unresolved variables"
            );
            let e = RequestError::from(e);
            self.report_failure(&target.input, &e);
            return Err(e);
        }

        if self.options.options.store_response {
            self.options.output.write_store_debug_data(
                &target.input,
                &self.options.template_id,
                Protocol::Http,
                &format!("{} {}", generated.method, generated.url),
            );
        }

        self.options.rate_limiter.take().await;
        let response = match client::send_request(
            &self.options.dialer,
            &generated,
            self.options.options.timeout,
            gate,
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                self.report_failure(&target.input, &e);
                return Err(e);
            }
        };
        self.options.progress.increment_requests();
        self.options
            .output
            .request(&self.options.template_path, &target.input, Protocol::Http, None);
        debug!(url = %generated.url, status = response.status, "sent http request");

        let host = generated.url.host_str().unwrap_or_default().to_string();
        let mut response_vars = Variables::new();
        response_vars.insert("request", format!("{} {}", generated.method, generated.url));
        response_vars.insert("status_code", response.status as i64);
        response_vars.insert("all_headers", response.all_headers());
        response_vars.insert(
            "body",
            String::from_utf8_lossy(&response.body).into_owned(),
        );
        response_vars.insert(
            "response",
            format!(
                "{}\r\n{}",
                response.all_headers(),
                String::from_utf8_lossy(&response.body)
            ),
        );
        response_vars.insert("content_length", response.body.len() as i64);
        response_vars.insert("host", target.input.clone());
        response_vars.insert("matched", generated.url.as_str());

        let mut event = create_event(EventParts {
            response: response_vars,
            template_ctx: &target.template_ctx,
            previous,
            payload: &generated.meta,
            captures: &Variables::new(),
            ip: self.options.dialer.dialed_ip(&host),
            stop_at_first_match: self.options.stop_at_first_match,
        });

        if !generated.interactsh_urls.is_empty() {
            if let Some(oast) = &self.options.interactsh {
                oast.make_placeholders(&generated.interactsh_urls, &mut event.internal);
                event.uses_interactsh = true;
                oast.request_event(OastRequest {
                    placeholders: generated.interactsh_urls,
                    event,
                });
                return Ok(None);
            }
        }
        Ok(Some(event))
    }

    /// An event with no response fields; emitted for failed attempts so
    /// downstream correlation still sees them.
    fn empty_event(&self, target: &Target, previous: &Variables) -> WrappedEvent {
        let mut response = Variables::new();
        response.insert("host", target.input.clone());
        create_event(EventParts {
            response,
            template_ctx: &target.template_ctx,
            previous,
            payload: &Variables::new(),
            captures: &Variables::new(),
            ip: None,
            stop_at_first_match: false,
        })
    }

    fn report_failure(&self, target: &str, error: &RequestError) {
        self.options.output.request(
            &self.options.template_path,
            target,
            Protocol::Http,
            Some(error),
        );
        self.options.progress.increment_failed_requests_by(1);
    }
}

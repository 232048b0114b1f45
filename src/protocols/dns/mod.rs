// SPDX-License-Identifier: GPL-2.0-or-later

//! DNS protocol request execution.
//!
//! The question template is compiled against the merged variables and
//! sent through the shared resolver, or through an ad-hoc resolver when
//! the template's resolver list itself contains variables.

use std::sync::{Arc, Mutex};

use hickory_resolver::config::{
    NameServerConfig, Protocol as DnsTransport, ResolverConfig, ResolverOpts,
};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

use crate::models::{DnsRequest, Protocol, Target};
use crate::vars::{self, Variables};

use super::{
    cancelled, create_event, utils, CancelToken, EventParts, ExecutorOptions, MultiError,
    RequestError, RequestResult, WrappedEvent,
};

/// Executes a DNS template request against targets.
pub struct DnsExecutor {
    pub request: DnsRequest,
    pub options: ExecutorOptions,
    /// Built once per template: the resolver list when it is static,
    /// the dialer's shared resolver otherwise.
    default_resolver: TokioAsyncResolver,
}

impl DnsExecutor {
    pub fn new(request: DnsRequest, options: ExecutorOptions) -> Result<Arc<Self>, RequestError> {
        let is_static = request
            .resolvers
            .iter()
            .all(|r| vars::contains_unresolved_variables(r).is_ok());
        let default_resolver = if request.resolvers.is_empty() || !is_static {
            options.dialer.resolver()
        } else {
            build_resolver(&request.resolvers, request.retries, request.recursion)?
        };
        Ok(Arc::new(Self {
            request,
            options,
            default_resolver,
        }))
    }

    /// Executes the request and streams result envelopes. The channel
    /// closes exactly once, after all workers have finished; the error
    /// aggregate, if any, arrives as the final envelope.
    pub fn execute_with_results(
        self: &Arc<Self>,
        target: &Target,
        metadata: &Variables,
        previous: &Variables,
        cancel: CancelToken,
    ) -> mpsc::Receiver<RequestResult> {
        let (tx, rx) = mpsc::channel(1);
        let executor = self.clone();
        let target = target.clone();
        let metadata = metadata.clone();
        let previous = previous.clone();
        tokio::spawn(async move {
            if let Err(e) = executor
                .run(&target, &metadata, &previous, cancel, tx.clone())
                .await
            {
                let _ = tx.send(RequestResult::Error(e)).await;
            }
        });
        rx
    }

    async fn run(
        self: Arc<Self>,
        target: &Target,
        metadata: &Variables,
        previous: &Variables,
        cancel: CancelToken,
        tx: mpsc::Sender<RequestResult>,
    ) -> Result<(), RequestError> {
        // URL inputs contribute their hostname only
        let domain = if target.input.contains("://") {
            Url::parse(&target.input)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_default()
        } else {
            target.input.clone()
        };
        let domain = utils::parse_dns_input(&domain, self.request.record_type)?;

        let base = utils::generate_dns_variables(&domain);
        let base = Variables::merged(&[
            &base,
            metadata,
            &self.options.options.vars,
            &target.template_ctx,
        ]);
        let evaluated = self.options.evaluate_variables(&base);
        let variables = Variables::merged(&[&base, &evaluated, &self.options.constants]);

        if !self.request.payloads.is_empty() {
            let iterator = self.request.payloads.iterator()?;
            let (pool, follow_global) = self.options.pool_for(self.request.threads);
            let errors = Arc::new(Mutex::new(MultiError::new()));
            let mut workers = JoinSet::new();
            for payload in iterator {
                self.options.resize_checkpoint(&pool, follow_global);
                let merged = Variables::merged(&[&variables, &payload]);
                let permit = pool.acquire().await;
                let executor = self.clone();
                let target = target.clone();
                let domain = domain.clone();
                let previous = previous.clone();
                let errors = errors.clone();
                let tx = tx.clone();
                let cancel = cancel.clone();
                workers.spawn(async move {
                    let _permit = permit;
                    match executor
                        .execute(&target, &domain, merged, payload, &previous, &cancel)
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
                .execute(
                    target,
                    &domain,
                    variables,
                    Variables::new(),
                    previous,
                    &cancel,
                )
                .await?;
            if let Some(event) = event {
                let _ = tx.send(RequestResult::Event(event)).await;
            }
            Ok(())
        }
    }

    /// Builds and sends a single compiled question.
    async fn execute(
        &self,
        target: &Target,
        domain: &str,
        variables: Variables,
        payload: Variables,
        previous: &Variables,
        cancel: &CancelToken,
    ) -> Result<Option<WrappedEvent>, RequestError> {
        if cancelled(cancel) {
            return Err(RequestError::Cancelled);
        }
        let question = vars::evaluate(&self.request.name, &variables)?;
        let question = utils::fqdn(&question);
        if let Err(e) = vars::contains_unresolved_variables(&question) {
            warn!(
                template = %self.options.template_id,
                %question,
                error = %e,
                "could not make dns request"
            );
            self.options.progress.increment_failed_requests_by(1);
            return Err(e.into());
        }

        let resolver = self.resolver_for(&variables)?;
        let record_type: RecordType = self.request.record_type.into();
        let request_string = format!("{question} IN {record_type}");

        if self.options.options.store_response {
            self.options.output.write_store_debug_data(
                domain,
                &self.options.template_id,
                Protocol::Dns,
                &request_string,
            );
        }

        self.options.rate_limiter.take().await;

        let (rcode, answers) = match resolver.lookup(question.clone(), record_type).await {
            Ok(lookup) => {
                let answers = lookup
                    .record_iter()
                    .map(|r| r.to_string())
                    .collect::<Vec<_>>()
                    .join("\n");
                ("NOERROR".to_string(), answers)
            }
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { response_code, .. } => {
                    (response_code.to_string(), String::new())
                }
                _ => {
                    self.options.output.request(
                        &self.options.template_path,
                        domain,
                        Protocol::Dns,
                        Some(&RequestError::Dns(e.to_string())),
                    );
                    self.options.progress.increment_failed_requests_by(1);
                    return Err(RequestError::Dns(e.to_string()));
                }
            },
        };
        self.options.progress.increment_requests();
        self.options
            .output
            .request(&self.options.template_path, domain, Protocol::Dns, None);
        debug!(template = %self.options.template_id, %question, "sent dns request");

        let mut response = Variables::new();
        response.insert("request", request_string);
        response.insert("question", question.trim_end_matches('.'));
        response.insert("rcode", rcode);
        response.insert("answer", answers.clone());
        response.insert("raw", answers);
        response.insert("host", target.input.clone());
        response.insert("matched", domain.trim_end_matches('.'));
        if self.request.trace {
            let trace = self
                .trace(&resolver, domain, self.request.trace_max_recursion)
                .await;
            response.insert("trace", trace.join("\n"));
        }

        Ok(Some(create_event(EventParts {
            response,
            template_ctx: &target.template_ctx,
            previous,
            payload: &payload,
            captures: &Variables::new(),
            ip: None,
            stop_at_first_match: self.options.stop_at_first_match,
        })))
    }

    /// The resolver to use for one request. Resolver lists referring to
    /// template variables build an ad-hoc client per request instead of
    /// reusing the default one.
    fn resolver_for(&self, variables: &Variables) -> Result<TokioAsyncResolver, RequestError> {
        let needs_substitution = self
            .request
            .resolvers
            .iter()
            .any(|r| vars::contains_unresolved_variables(r).is_err());
        if !needs_substitution {
            return Ok(self.default_resolver.clone());
        }
        let resolvers: Vec<String> = self
            .request
            .resolvers
            .iter()
            .map(|r| vars::replace(r, variables))
            .collect();
        for resolver in &resolvers {
            // a resolver entry no layer could fill aborts the variant
            vars::contains_unresolved_variables(resolver)?;
        }
        build_resolver(&resolvers, self.request.retries, self.request.recursion)
    }

    /// Iterative zone walk from the TLD towards the full question name,
    /// bounded by the trace recursion limit.
    async fn trace(
        &self,
        resolver: &TokioAsyncResolver,
        domain: &str,
        max_recursion: usize,
    ) -> Vec<String> {
        let trimmed = domain.trim_end_matches('.');
        let labels: Vec<&str> = trimmed.split('.').collect();
        let mut lines = Vec::new();
        for i in (0..labels.len()).rev() {
            if lines.len() >= max_recursion {
                break;
            }
            let zone = format!("{}.", labels[i..].join("."));
            match resolver.lookup(zone.clone(), RecordType::NS).await {
                Ok(lookup) => {
                    for record in lookup.record_iter() {
                        lines.push(record.to_string());
                    }
                }
                Err(e) => {
                    debug!(%zone, error = %e, "trace lookup failed");
                }
            }
        }
        lines
    }
}

/// Builds a resolver for a non-empty `host[:port]` server list.
fn build_resolver(
    resolvers: &[String],
    retries: usize,
    recursion: bool,
) -> Result<TokioAsyncResolver, RequestError> {
    let mut opts = ResolverOpts::default();
    opts.attempts = retries.max(1);
    opts.recursion_desired = recursion;
    let mut config = ResolverConfig::new();
    for entry in resolvers {
        let (host, port) = match entry.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => (
                host,
                port.parse::<u16>()
                    .map_err(|_| RequestError::Configuration(format!("invalid resolver {entry}")))?,
            ),
            _ => (entry.as_str(), 53),
        };
        let ip = host
            .parse()
            .map_err(|_| RequestError::Configuration(format!("invalid resolver address {entry}")))?;
        config.add_name_server(NameServerConfig::new(
            std::net::SocketAddr::new(ip, port),
            DnsTransport::Udp,
        ));
    }
    Ok(TokioAsyncResolver::tokio(config, opts))
}

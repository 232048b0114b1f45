// SPDX-License-Identifier: GPL-2.0-or-later

use tracing::debug;

use crate::models::{NetworkRequest, Target};

use super::super::{utils, ExecutorOptions, MultiError, RequestError};

/// Filters the template's candidate ports to those observed open.
///
/// A single-port template skips probing. When every probe fails, the
/// aggregated error is returned; a partially failing scan only logs and
/// continues with the open subset.
pub(super) async fn open_ports(
    request: &NetworkRequest,
    target: &Target,
    options: &ExecutorOptions,
) -> Result<Vec<u16>, RequestError> {
    if request.ports.len() == 1 {
        return Ok(request.ports.clone());
    }
    let mut errors = MultiError::new();
    let mut open = Vec::new();
    for &port in &request.ports {
        let mut cloned = target.clone();
        if let Err(reason) = cloned.use_network_port(port, &request.exclude_ports) {
            errors.push(RequestError::Configuration(reason));
            continue;
        }
        let addr = match utils::get_address(&cloned.address()) {
            Ok(addr) => addr,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };
        match options.dialer.dial_addr(&addr, false).await {
            Ok(conn) => {
                drop(conn);
                open.push(port);
            }
            Err(e) => errors.push(e.into()),
        }
    }
    if open.is_empty() {
        return Err(RequestError::NoOpenPorts(errors));
    }
    if !errors.is_empty() {
        debug!(
            template = %options.template_id,
            errors = %errors,
            "got errors while checking open ports"
        );
    }
    Ok(open)
}

//! Request engine - validate, resolve and assemble in one call, singly or in
//! batches.

use std::num::NonZeroUsize;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::assembler::assemble;
use crate::error::ResolveError;
use crate::registry::FieldRegistry;
use crate::resolver::resolve;
use crate::types::{Discriminant, RawInputs, ResolvedRequest};
use crate::validator::validate;
use crate::visibility::active_fields_with_inputs;

/// One request to build: where in the schema, and with which inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub discriminant: Discriminant,
    #[serde(default)]
    pub inputs: RawInputs,
}

impl Invocation {
    pub fn new(discriminant: Discriminant, inputs: RawInputs) -> Self {
        Self {
            discriminant,
            inputs,
        }
    }
}

/// Build the request for `discriminant` from raw `inputs`.
///
/// Pure: the same registry, discriminant and inputs always yield the same
/// request.
///
/// # Errors
///
/// Returns `ResolveError` when the operation is unknown, inputs are invalid,
/// or values cannot be placed in the request.
pub fn build_request(
    registry: &FieldRegistry,
    discriminant: &Discriminant,
    inputs: &RawInputs,
) -> Result<ResolvedRequest, ResolveError> {
    let active = active_fields_with_inputs(registry, discriminant, inputs)?;
    validate(&active, inputs)?;
    let values = resolve(active, inputs)?;
    let request = assemble(&values, registry.base_url())?;

    debug!(
        resource = %discriminant.resource,
        operation = %discriminant.operation,
        method = request.method.as_str(),
        url = %request.url,
        "built request"
    );
    Ok(request)
}

/// Build many requests in parallel, one result per invocation, in order.
///
/// The registry is shared read-only; a failing invocation does not affect
/// the others.
pub fn build_batch(
    registry: &FieldRegistry,
    invocations: &[Invocation],
) -> Vec<Result<ResolvedRequest, ResolveError>> {
    if invocations.is_empty() {
        return Vec::new();
    }

    let workers = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .min(invocations.len());
    let chunk_size = (invocations.len() + workers - 1) / workers;

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = invocations
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|inv| build_request(registry, &inv.discriminant, &inv.inputs))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(results) => results,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });

    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        warn!(total = results.len(), failed, "batch finished with failures");
    } else {
        debug!(total = results.len(), workers, "batch finished");
    }
    results
}

//! Pairs sub-responses with the calls of one physical request and settles
//! each into a per-call result.

use crate::envelope::{self, DecodedEntries};
use crate::error::{BridgeError, BridgeResult};
use crate::types::{Dialect, ResponseEntry, TransportResponse};

/// Decode `response` and return exactly `expected` entries in request order.
///
/// Any count or id mismatch is a `ProtocolIntegrity` error for the whole
/// request: nothing is attributed when pairing is uncertain.
pub fn demux(dialect: Dialect, response: &TransportResponse, expected: usize) -> BridgeResult<Vec<ResponseEntry>> {
    match envelope::decode(dialect, response)? {
        DecodedEntries::Positional(entries) => {
            if entries.len() != expected {
                return Err(BridgeError::protocol(format!(
                    "{} batch returned {} responses for {} requests",
                    dialect,
                    entries.len(),
                    expected
                ))
                .with_dialect(dialect));
            }
            Ok(entries)
        }
        DecodedEntries::Identified(pairs) => match_by_id(dialect, pairs, expected),
    }
}

fn match_by_id(dialect: Dialect, pairs: Vec<(String, ResponseEntry)>, expected: usize) -> BridgeResult<Vec<ResponseEntry>> {
    let mismatch = |msg: String| BridgeError::protocol(msg).with_dialect(dialect);

    let mut slots: Vec<Option<ResponseEntry>> = vec![None; expected];
    for (id, mut entry) in pairs {
        let index = id
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .filter(|i| *i < expected)
            .ok_or_else(|| mismatch(format!("response id '{}' matches no request", id)))?;
        if slots[index].is_some() {
            return Err(mismatch(format!("duplicate response id '{}'", id)));
        }
        entry.position = index;
        slots[index] = Some(entry);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| slot.ok_or_else(|| mismatch(format!("no response for request id '{}'", i + 1))))
        .collect()
}

/// Success entries pass through; failures become `Service` errors.
pub fn settle(dialect: Dialect, entry: ResponseEntry) -> BridgeResult<ResponseEntry> {
    if entry.is_success() {
        Ok(entry)
    } else {
        Err(BridgeError::from_service_response(dialect, &entry))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

/// Strict validation of a raw block as received over JSON-RPC.
///
/// Replaces the teacher's wire-format trust boundary — PIVX Core's own RPC
/// is the trusted source there, so `monitor.rs` parses its JSON with little
/// scrutiny — with an explicit schema check: this indexer tails third-party
/// nodes, and a malformed or out-of-range field here must fail loud rather
/// than corrupt a NUMERIC column or silently truncate a height.
use bigdecimal::BigDecimal;
use std::str::FromStr;

use crate::constants::HASH_HEX_LEN;
use crate::error::ValidationError;
use crate::types::{Block, RawBlock};

/// Parses a JSON-RPC "quantity" field into a big integer and asserts it
/// fits the unsigned 64-bit domain every height/timestamp column lives in —
/// negative and `>= 2^64` values are rejected rather than truncated, since
/// callers downstream (`reorg.rs`, `sync.rs`) coerce this value to `u64` and
/// a silent truncation there would corrupt a height comparison.
fn parse_quantity(raw: &str) -> Result<BigDecimal, ValidationError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if raw.contains(['e', 'E']) && !raw.starts_with("0x") {
        return Err(ValidationError::ScientificNotation(raw.to_string()));
    }
    let value = if raw.starts_with("0x") {
        u128::from_str_radix(digits, 16)
            .map_err(|_| ValidationError::NumberOutOfRange(raw.to_string()))
            .map(BigDecimal::from)?
    } else {
        BigDecimal::from_str(raw).map_err(|_| ValidationError::NumberOutOfRange(raw.to_string()))?
    };

    if value < BigDecimal::from(0) || value > BigDecimal::from(u64::MAX) {
        return Err(ValidationError::NumberOutOfRange(raw.to_string()));
    }

    Ok(value)
}

fn validate_hash(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.len() != HASH_HEX_LEN
        || !value.starts_with("0x")
        || !value[2..].chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
        return Err(ValidationError::MalformedHash {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

const ZERO_HASH: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

/// Cheap shape check on a raw block's hash fields, run at the RPC client
/// boundary before the full chain-aware validation below: malformed or
/// self-referential hashes are rejected the moment they arrive over the
/// wire rather than threading a bad payload further into the pipeline.
pub fn validate_hash_shape(raw: &RawBlock) -> Result<(), ValidationError> {
    validate_hash("hash", &raw.hash)?;
    validate_hash("parentHash", &raw.parent_hash)?;
    if raw.hash == raw.parent_hash {
        return Err(ValidationError::SelfParent(raw.number.clone()));
    }
    Ok(())
}

/// Validates a raw RPC block and converts it into the canonical [`Block`]
/// representation. `now_secs` is passed in rather than read from the clock
/// directly so tests can exercise the future-timestamp boundary exactly.
pub fn validate_block(
    chain_id: &BigDecimal,
    raw: &RawBlock,
    now_secs: i64,
    max_future_skew_secs: i64,
) -> Result<Block, ValidationError> {
    validate_hash_shape(raw)?;

    let number = parse_quantity(&raw.number)?;
    let timestamp = parse_quantity(&raw.timestamp)?;

    if number != BigDecimal::from(0) && raw.parent_hash == ZERO_HASH {
        return Err(ValidationError::ZeroParentHash(number.to_string()));
    }

    let timestamp_i64 = timestamp
        .to_string()
        .parse::<i64>()
        .map_err(|_| ValidationError::NumberOutOfRange(raw.timestamp.clone()))?;
    if timestamp_i64 > now_secs + max_future_skew_secs {
        return Err(ValidationError::TimestampTooFarFuture {
            timestamp: timestamp_i64,
            max_skew_secs: max_future_skew_secs,
        });
    }

    Ok(Block {
        chain_id: chain_id.clone(),
        number,
        hash: raw.hash.clone(),
        parent_hash: raw.parent_hash.clone(),
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(number: &str, hash: &str, parent: &str, ts: &str) -> RawBlock {
        RawBlock {
            number: number.to_string(),
            hash: hash.to_string(),
            parent_hash: parent.to_string(),
            timestamp: ts.to_string(),
        }
    }

    const H1: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";
    const H2: &str = "0x2222222222222222222222222222222222222222222222222222222222222222";
    const H0: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

    #[test]
    fn accepts_well_formed_block() {
        let block = validate_block(
            &BigDecimal::from(1),
            &raw("0x64", H1, H2, "0x5f5e100"),
            200_000_000,
            86_400,
        );
        assert!(block.is_ok());
    }

    #[test]
    fn rejects_uppercase_hash() {
        let upper = format!("0x{}", "A".repeat(64));
        let err = validate_block(&BigDecimal::from(1), &raw("0x1", &upper, H0, "0x1"), 10, 86_400);
        assert!(matches!(err, Err(ValidationError::MalformedHash { .. })));
    }

    #[test]
    fn rejects_malformed_hash() {
        let err = validate_block(&BigDecimal::from(1), &raw("0x1", "not-a-hash", H0, "0x1"), 10, 86_400);
        assert!(matches!(err, Err(ValidationError::MalformedHash { .. })));
    }

    #[test]
    fn rejects_scientific_notation() {
        let err = validate_block(&BigDecimal::from(1), &raw("1e10", H1, H0, "0x1"), 10, 86_400);
        assert!(matches!(err, Err(ValidationError::ScientificNotation(_))));
    }

    #[test]
    fn hash_shape_check_runs_independently_of_chain_context() {
        assert!(validate_hash_shape(&raw("0x1", H1, H0, "0x1")).is_ok());
        assert!(matches!(
            validate_hash_shape(&raw("0x1", H1, H1, "0x1")),
            Err(ValidationError::SelfParent(_))
        ));
    }

    #[test]
    fn rejects_self_parent() {
        let err = validate_block(&BigDecimal::from(1), &raw("0x1", H1, H1, "0x1"), 10, 86_400);
        assert!(matches!(err, Err(ValidationError::SelfParent(_))));
    }

    #[test]
    fn rejects_non_genesis_zero_parent() {
        let err = validate_block(&BigDecimal::from(1), &raw("0x5", H1, H0, "0x1"), 10, 86_400);
        assert!(matches!(err, Err(ValidationError::ZeroParentHash(_))));
    }

    #[test]
    fn genesis_may_have_zero_parent() {
        let block = validate_block(&BigDecimal::from(1), &raw("0x0", H1, H0, "0x1"), 10, 86_400);
        assert!(block.is_ok());
    }

    #[test]
    fn rejects_number_at_or_above_2_pow_64() {
        let err = validate_block(&BigDecimal::from(1), &raw("0x10000000000000000", H1, H0, "0x1"), 10, 86_400);
        assert!(matches!(err, Err(ValidationError::NumberOutOfRange(_))));
    }

    #[test]
    fn rejects_negative_number() {
        let err = validate_block(&BigDecimal::from(1), &raw("-1", H1, H0, "0x1"), 10, 86_400);
        assert!(matches!(err, Err(ValidationError::NumberOutOfRange(_))));
    }

    #[test]
    fn accepts_u64_max_number() {
        let block = validate_block(&BigDecimal::from(1), &raw(&u64::MAX.to_string(), H1, H0, "0x1"), 10, 86_400);
        assert!(block.is_ok());
    }

    #[test]
    fn rejects_timestamp_too_far_in_future() {
        let err = validate_block(&BigDecimal::from(1), &raw("0x1", H1, H2, "0x5f5e100"), 0, 86_400);
        assert!(matches!(err, Err(ValidationError::TimestampTooFarFuture { .. })));
    }
}

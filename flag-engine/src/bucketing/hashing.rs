use std::io::Cursor;

use crate::api::errors::FlagError;

/// Seed shared by every SDK that buckets users for the same account.
/// Changing it reshuffles every user, so it must never change.
pub const HASH_SEED: u32 = 1;
/// Bucket space used for traffic membership checks (percent).
pub const MAX_TRAFFIC_PERCENT: u32 = 100;
/// Bucket space used for variation ranges.
pub const MAX_TRAFFIC_VALUE: u32 = 10_000;

const HASH_SPACE: f64 = 4_294_967_296.0; // 2^32

/// 32-bit MurmurHash3 (x86 variant) of the UTF-8 bytes of `key`, seeded with [`HASH_SEED`].
pub fn hash(key: &str) -> Result<u32, FlagError> {
    murmur3::murmur3_32(&mut Cursor::new(key.as_bytes()), HASH_SEED)
        .map_err(|e| FlagError::HashingError(e.to_string()))
}

/// Maps a hash onto `[1, max_value]`, scaled by `multiplier`.
///
/// `floor(((hash / 2^32) * max_value + 1) * multiplier)`. A multiplier of 0
/// always yields bucket 0, which no variation range contains.
pub fn to_bucket(hash_value: u32, max_value: u32, multiplier: u32) -> u32 {
    let ratio = f64::from(hash_value) / HASH_SPACE;
    let bucket = (f64::from(max_value) * ratio + 1.0) * f64::from(multiplier);
    bucket.floor() as u32
}

/// Bucket in `[1, 100]` for a traffic membership key.
pub fn bucket_for_user(user_id: &str) -> Result<u32, FlagError> {
    bucket_for_user_with_max(user_id, MAX_TRAFFIC_PERCENT)
}

pub fn bucket_for_user_with_max(user_id: &str, max_value: u32) -> Result<u32, FlagError> {
    if user_id.is_empty() {
        return Err(FlagError::InputValidationError(
            "user id is required for bucketing".to_string(),
        ));
    }
    Ok(to_bucket(hash(user_id)?, max_value, 1))
}

/// Bucket in `[1, 10000]` for an arbitrary seed string (whitelisting, MEG).
pub fn bucket_for_string(key: &str) -> Result<u32, FlagError> {
    bucket_for_string_with(key, 1, MAX_TRAFFIC_VALUE)
}

pub fn bucket_for_string_with(
    key: &str,
    multiplier: u32,
    max_value: u32,
) -> Result<u32, FlagError> {
    Ok(to_bucket(hash(key)?, max_value, multiplier))
}

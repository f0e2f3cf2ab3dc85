use once_cell::sync::Lazy;
use uuid::Uuid;

use crate::settings::settings_models::AccountId;

static VWO_NAMESPACE: Lazy<Uuid> =
    Lazy::new(|| Uuid::new_v5(&Uuid::NAMESPACE_URL, b"https://vwo.com"));

/// Deterministic user id used by campaigns with user lists enabled.
///
/// UUIDv5 of `user_id` under a per-account namespace, rendered as 32
/// uppercase hex characters.
pub fn user_list_id(account_id: AccountId, user_id: &str) -> String {
    let account_namespace = Uuid::new_v5(&VWO_NAMESPACE, account_id.to_string().as_bytes());
    Uuid::new_v5(&account_namespace, user_id.as_bytes())
        .simple()
        .to_string()
        .to_uppercase()
}

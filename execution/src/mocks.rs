//! Test helpers shared with downstream crates (enabled by the `mocks` feature).

use crate::auth::{CredentialVerifier, DEFAULT_MAX_AGE_SECS};
use rand::rngs::mock::StepRng;
use std::collections::BTreeMap;

/// Builds a signed, URL-encoded launch credential from raw fields.
pub fn init_data_fields(bot_token: &str, fields: &[(&str, &str)]) -> String {
    let fields: BTreeMap<String, String> = fields
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    let hash = CredentialVerifier::new(bot_token, DEFAULT_MAX_AGE_SECS).sign(&fields);
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &fields {
        serializer.append_pair(key, value);
    }
    serializer.append_pair("hash", &hash);
    serializer.finish()
}

/// Builds a signed credential carrying `user_json`, issued at `auth_date` (seconds).
pub fn init_data(bot_token: &str, user_json: &str, auth_date: u64) -> String {
    let auth_date = auth_date.to_string();
    init_data_fields(
        bot_token,
        &[
            ("auth_date", auth_date.as_str()),
            ("query_id", "AAHdF6IQAAAAAN0XohDhrOrc"),
            ("user", user_json),
        ],
    )
}

/// Random source whose draws always land on a combo.
pub fn combo_rng() -> StepRng {
    StepRng::new(0, 0)
}

/// Random source whose draws never land on a combo.
pub fn plain_rng() -> StepRng {
    StepRng::new(u64::MAX, 0)
}

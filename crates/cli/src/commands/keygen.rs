use dialgate_core::vault::{generate_token, parse_key};

use crate::commands::CommandResult;

const KEY_BYTES: usize = 32;

/// Emits a hex key suitable for `vault.encryption_key` / `DIALGATE_VAULT_ENCRYPTION_KEY`.
pub fn run() -> CommandResult {
    let key = generate_token(KEY_BYTES);
    match parse_key(&key) {
        Ok(_) => CommandResult::success("keygen", key),
        Err(error) => CommandResult::failure("keygen", "vault_key", error.to_string(), 3),
    }
}

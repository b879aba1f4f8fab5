use anyhow::Context;

/// Where we store secrets in the OS keyring.
///
/// This is intentionally constant so upgrades don't orphan secrets.
const SERVICE: &str = "intervue";

pub const DEEPGRAM_API_KEY_ENV: &str = "DEEPGRAM_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKey {
    DeepgramApiKey,
}

impl SecretKey {
    fn user(self) -> &'static str {
        match self {
            SecretKey::DeepgramApiKey => "deepgram_api_key",
        }
    }

    fn env_var(self) -> &'static str {
        match self {
            SecretKey::DeepgramApiKey => DEEPGRAM_API_KEY_ENV,
        }
    }
}

pub fn set_secret(key: SecretKey, value: &str) -> anyhow::Result<()> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;
    entry.set_password(value).context("set secret")
}

pub fn get_secret(key: SecretKey) -> anyhow::Result<Option<String>> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;

    match entry.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(anyhow::Error::new(e)).context("get secret"),
    }
}

pub fn delete_secret(key: SecretKey) -> anyhow::Result<()> {
    let entry = keyring::Entry::new(SERVICE, key.user()).context("create keyring entry")?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(anyhow::Error::new(e)).context("delete secret"),
    }
}

/// Keyring first, then the environment. An unusable keyring (no secret
/// service on headless hosts) falls through to the environment.
pub fn resolve_secret(key: SecretKey) -> Option<String> {
    let from_keyring = match get_secret(key) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("secrets: keyring unavailable for {}: {e:#}", key.user());
            None
        }
    };

    pick_secret(from_keyring, std::env::var(key.env_var()).ok())
}

fn pick_secret(from_keyring: Option<String>, from_env: Option<String>) -> Option<String> {
    [from_keyring, from_env]
        .into_iter()
        .flatten()
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

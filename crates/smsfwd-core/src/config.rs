use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const DEFAULT_SMS_API_BASE: &str = "http://sms.szfangmm.com:3000/api/smslist";
pub const DEFAULT_KEYWORD_DELIMITERS: &str = ",\u{ff0c}";

/// Process configuration, read once from the environment at startup.
///
/// Operator-tunable state (tokens, destination, keywords) lives in the
/// persisted record managed by [`crate::store::ConfigStore`], not here.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub admin_user_ids: Vec<i64>,

    // SMS source
    pub sms_api_base: String,
    pub source_timeout: Duration,

    // Forwarding
    pub forward_timeout: Duration,
    pub keyword_delimiters: Vec<char>,

    // Persistence
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        // ADMIN_USER_IDS wins; ADMIN_USER_ID is the single-admin spelling.
        let admin_user_ids = parse_csv_i64(
            env_str("ADMIN_USER_IDS")
                .and_then(non_empty)
                .or_else(|| env_str("ADMIN_USER_ID")),
        );

        let sms_api_base = env_str("SMS_API_BASE")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_SMS_API_BASE.to_string());
        let source_timeout =
            Duration::from_secs(env_u64("SOURCE_TIMEOUT_SECS").unwrap_or(5).max(1));

        let forward_timeout =
            Duration::from_secs(env_u64("FORWARD_TIMEOUT_SECS").unwrap_or(10).max(1));
        let keyword_delimiters = parse_delimiters(env_str("KEYWORD_DELIMITERS"));

        let config_path = PathBuf::from(
            env_str("CONFIG_PATH")
                .and_then(non_empty)
                .unwrap_or_else(|| "config.json".to_string()),
        );

        Ok(Self {
            telegram_bot_token,
            admin_user_ids,
            sms_api_base,
            source_timeout,
            forward_timeout,
            keyword_delimiters,
            config_path,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

/// Comma list of numeric ids; anything that is not all digits is ignored.
fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn parse_delimiters(v: Option<String>) -> Vec<char> {
    let raw = v
        .and_then(non_empty)
        .unwrap_or_else(|| DEFAULT_KEYWORD_DELIMITERS.to_string());
    let mut out: Vec<char> = Vec::new();
    for c in raw.chars().filter(|c| !c.is_whitespace()) {
        if !out.contains(&c) {
            out.push(c);
        }
    }
    if out.is_empty() {
        return DEFAULT_KEYWORD_DELIMITERS.chars().collect();
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use crate::{errors::Error, retry, Result};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Classifier
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub classifier_timeout: Duration,

    // Tabular store
    pub google_credentials_path: PathBuf,
    pub google_sheet_id: String,
    pub sheets_base_url: String,
    pub sheet_name: String,

    // Transport
    pub telegram_bot_token: String,
    pub target_sender_id: String,
    /// Serve only `target_sender_id` when set.
    pub restrict_to_target_sender: bool,
    pub event_queue_capacity: usize,

    // Retry
    pub retry_max_attempts: u32,
    pub retry_backoff_base: Duration,
}

impl Config {
    /// Read `.env` (if present) and then the process environment.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. All missing required keys are
    /// reported together.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let mut missing = Vec::new();
        let mut required = |key: &'static str| {
            get(key).unwrap_or_else(|| {
                missing.push(key);
                String::new()
            })
        };

        let openai_api_key = required("OPENAI_API_KEY");
        let google_credentials_path = PathBuf::from(required("GOOGLE_CREDENTIALS_JSON"));
        let google_sheet_id = required("GOOGLE_SHEET_ID");
        let sheet_name = required("SHEET_NAME");
        let target_sender_id = required("TARGET_SENDER_ID");
        let telegram_bot_token = required("TELEGRAM_BOT_TOKEN");

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let openai_model = get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
        let openai_base_url = get("OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let classifier_timeout =
            Duration::from_millis(parse_num(&get, "CLASSIFIER_TIMEOUT_MS")?.unwrap_or(30_000));

        let sheets_base_url = get("SHEETS_BASE_URL")
            .unwrap_or_else(|| DEFAULT_SHEETS_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let restrict_to_target_sender =
            parse_bool(&get, "RESTRICT_TO_TARGET_SENDER")?.unwrap_or(false);

        let event_queue_capacity = parse_num(&get, "EVENT_QUEUE_CAPACITY")?
            .unwrap_or(256)
            .max(1) as usize;

        let retry_max_attempts = parse_num(&get, "RETRY_MAX_ATTEMPTS")?
            .map(|n| n.clamp(1, u32::MAX as u64) as u32)
            .unwrap_or(retry::DEFAULT_MAX_ATTEMPTS);
        let retry_backoff_base = parse_num(&get, "RETRY_BACKOFF_MS")?
            .map(Duration::from_millis)
            .unwrap_or(retry::DEFAULT_BACKOFF_BASE);

        Ok(Self {
            openai_api_key,
            openai_model,
            openai_base_url,
            classifier_timeout,
            google_credentials_path,
            google_sheet_id,
            sheets_base_url,
            sheet_name,
            telegram_bot_token,
            target_sender_id,
            restrict_to_target_sender,
            event_queue_capacity,
            retry_max_attempts,
            retry_backoff_base,
        })
    }
}

fn parse_num(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got {raw:?}")))
}

fn parse_bool(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>> {
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(Error::Config(format!("{key} must be a boolean, got {raw:?}"))),
    }
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

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("OPENAI_API_KEY", "sk-test"),
            ("GOOGLE_CREDENTIALS_JSON", "/etc/finbot/sa.json"),
            ("GOOGLE_SHEET_ID", "sheet-123"),
            ("SHEET_NAME", "Finanças"),
            ("TARGET_SENDER_ID", "42"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<Config> {
        Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply_when_only_required_set() {
        let cfg = load(&full()).unwrap();
        assert_eq!(cfg.openai_model, "gpt-3.5-turbo");
        assert_eq!(cfg.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(cfg.classifier_timeout, Duration::from_secs(30));
        assert_eq!(cfg.sheets_base_url, "https://sheets.googleapis.com");
        assert_eq!(cfg.retry_max_attempts, 3);
        assert_eq!(cfg.retry_backoff_base, Duration::from_secs(2));
        assert_eq!(cfg.event_queue_capacity, 256);
        assert!(!cfg.restrict_to_target_sender);
        assert_eq!(cfg.sheet_name, "Finanças");
        assert_eq!(
            cfg.google_credentials_path,
            PathBuf::from("/etc/finbot/sa.json")
        );
    }

    #[test]
    fn reports_every_missing_variable() {
        let mut vars = full();
        vars.remove("OPENAI_API_KEY");
        vars.insert("SHEET_NAME", "   ");

        let err = load(&vars).unwrap_err().to_string();
        assert!(err.contains("OPENAI_API_KEY"), "{err}");
        assert!(err.contains("SHEET_NAME"), "{err}");
        assert!(!err.contains("GOOGLE_SHEET_ID"), "{err}");
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = full();
        vars.insert("RETRY_MAX_ATTEMPTS", "5");
        vars.insert("RETRY_BACKOFF_MS", "250");
        vars.insert("OPENAI_BASE_URL", "http://localhost:8080/v1/");
        vars.insert("CLASSIFIER_TIMEOUT_MS", "1000");

        let cfg = load(&vars).unwrap();
        assert_eq!(cfg.retry_max_attempts, 5);
        assert_eq!(cfg.retry_backoff_base, Duration::from_millis(250));
        assert_eq!(cfg.openai_base_url, "http://localhost:8080/v1");
        assert_eq!(cfg.classifier_timeout, Duration::from_secs(1));
    }

    #[test]
    fn sender_restriction_is_opt_in() {
        let mut vars = full();
        vars.insert("RESTRICT_TO_TARGET_SENDER", "true");
        assert!(load(&vars).unwrap().restrict_to_target_sender);

        vars.insert("RESTRICT_TO_TARGET_SENDER", "off");
        assert!(!load(&vars).unwrap().restrict_to_target_sender);

        vars.insert("RESTRICT_TO_TARGET_SENDER", "maybe");
        assert!(matches!(load(&vars), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_non_numeric_values() {
        let mut vars = full();
        vars.insert("RETRY_MAX_ATTEMPTS", "three");
        assert!(matches!(load(&vars), Err(Error::Config(_))));
    }

    #[test]
    fn unquote_strips_matching_quotes_only() {
        assert_eq!(unquote("\"abc\""), "abc");
        assert_eq!(unquote("'abc'"), "abc");
        assert_eq!(unquote("\"abc'"), "\"abc'");
        assert_eq!(unquote("abc"), "abc");
    }
}

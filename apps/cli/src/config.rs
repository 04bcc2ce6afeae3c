use std::{collections::HashMap, fs};

#[derive(Debug, Clone)]
pub struct Settings {
    pub service_url: String,
    pub contract_address: Option<String>,
    pub request_timeout_seconds: u64,
    pub confirmation_timeout_seconds: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:8000".into(),
            contract_address: None,
            request_timeout_seconds: 30,
            confirmation_timeout_seconds: 120,
        }
    }
}

/// Defaults, overridden by `negotiator.toml` in the working directory,
/// overridden by environment variables.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("negotiator.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            apply_file_overrides(&mut settings, &file_cfg);
        }
    }

    if let Ok(v) = std::env::var("NEGOTIATOR_SERVICE_URL") {
        settings.service_url = v;
    }
    if let Ok(v) = std::env::var("NEGOTIATOR_CONTRACT_ADDRESS") {
        settings.contract_address = Some(v);
    }
    if let Ok(v) = std::env::var("NEGOTIATOR_REQUEST_TIMEOUT_SECONDS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_seconds = parsed;
        }
    }
    if let Ok(v) = std::env::var("NEGOTIATOR_CONFIRMATION_TIMEOUT_SECONDS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.confirmation_timeout_seconds = parsed;
        }
    }

    settings
}

fn apply_file_overrides(settings: &mut Settings, file_cfg: &HashMap<String, String>) {
    if let Some(v) = file_cfg.get("service_url") {
        settings.service_url = v.clone();
    }
    if let Some(v) = file_cfg.get("contract_address") {
        settings.contract_address = Some(v.clone());
    }
    if let Some(v) = file_cfg.get("request_timeout_seconds") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_seconds = parsed;
        }
    }
    if let Some(v) = file_cfg.get("confirmation_timeout_seconds") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.confirmation_timeout_seconds = parsed;
        }
    }
}

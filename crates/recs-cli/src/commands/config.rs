use anyhow::{Context, Result, anyhow, bail};
use recs_core::RecsError;
use recs_core::config::ClientConfig;
use recs_infrastructure::ConfigService;
use recs_infrastructure::config_service::parse_bool;
use toml::Value;

pub fn show() -> Result<()> {
    let config = ConfigService::new()?.get_config()?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path() -> Result<()> {
    println!("{}", ConfigService::new()?.path().display());
    Ok(())
}

/// Sets a dotted key (`streaming`, `stream.max_retries`, ...) in the file.
pub fn set(key: &str, raw: &str) -> Result<()> {
    let service = ConfigService::new()?;
    service
        .update(|config| {
            *config = with_key(config, key, raw).map_err(|e| RecsError::config(e.to_string()))?;
            Ok(())
        })
        .with_context(|| format!("failed to set '{key}'"))?;

    println!("{key} = {raw}");
    Ok(())
}

fn with_key(config: &ClientConfig, key: &str, raw: &str) -> Result<ClientConfig> {
    let mut root = Value::try_from(config)?;

    let mut slot = &mut root;
    for part in key.split('.') {
        slot = slot
            .get_mut(part)
            .ok_or_else(|| anyhow!("unknown configuration key '{key}'"))?;
    }

    let replacement = match slot {
        Value::Boolean(_) => Value::Boolean(
            parse_bool(raw).ok_or_else(|| anyhow!("'{key}' expects true or false"))?,
        ),
        Value::Integer(_) => Value::Integer(
            raw.trim()
                .parse()
                .map_err(|_| anyhow!("'{key}' expects a whole number"))?,
        ),
        Value::String(_) => Value::String(raw.to_string()),
        Value::Table(_) => bail!("'{key}' is a section, set one of its keys instead"),
        _ => bail!("'{key}' cannot be set from the command line"),
    };
    *slot = replacement;

    Ok(root.try_into()?)
}

use rowsync_config::load_config;
use rowsync_config::shared::OperatorConfig;

/// Loads the [`OperatorConfig`] and validates it.
pub fn load_operator_config() -> anyhow::Result<OperatorConfig> {
    let config = load_config::<OperatorConfig>()?;
    config.validate()?;

    Ok(config)
}

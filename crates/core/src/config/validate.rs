use super::{types::Config, ConfigError};

const MAX_WORKERS: usize = 16;

/// Reject settings the runtime cannot honour.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let orchestrator = &config.orchestrator;
    let space = &config.space;
    let checks = [
        (
            (1..=MAX_WORKERS).contains(&orchestrator.workers),
            "orchestrator.workers must be between 1 and 16",
        ),
        (orchestrator.queue_capacity > 0, "orchestrator.queue_capacity cannot be 0"),
        (orchestrator.retry.max_attempts > 0, "orchestrator.retry.max_attempts cannot be 0"),
        (
            orchestrator.retry.backoff_multiplier >= 1.0,
            "orchestrator.retry.backoff_multiplier must be at least 1.0",
        ),
        (config.placer.buffer_size > 0, "placer.buffer_size cannot be 0"),
        (config.dedup.hash_buffer_size > 0, "dedup.hash_buffer_size cannot be 0"),
        (space.export_overhead >= 1.0, "space.export_overhead must be at least 1.0"),
        (space.safety_buffer >= 1.0, "space.safety_buffer must be at least 1.0"),
        (space.poll_interval_ms > 0, "space.poll_interval_ms cannot be 0"),
    ];
    if let Some((_, msg)) = checks.iter().find(|(ok, _)| !ok) {
        return Err(ConfigError::ValidationError(msg.to_string()));
    }

    if let (Some(source), Some(destination)) = (&config.run.source, &config.run.destination) {
        if destination.starts_with(source) {
            return Err(ConfigError::ValidationError(format!(
                "run.destination {} is inside run.source {}",
                destination.display(),
                source.display()
            )));
        }
    }
    Ok(())
}

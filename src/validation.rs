use crate::db::models::{Confidence, Intention};
use crate::error::AppError;

/// Upper bound on intention text, counted in characters rather than bytes.
pub const MAX_TEXT_CHARS: usize = 280;

pub fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

pub fn require_max_chars(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    let count = value.chars().count();
    if count > max {
        return Err(AppError::Validation(format!(
            "{field} is {count} characters long (max {max})"
        )));
    }
    Ok(())
}

pub fn require_epoch_millis(field: &str, value: i64) -> Result<(), AppError> {
    if value < 0 {
        return Err(AppError::Validation(format!(
            "{field} must be milliseconds since the Unix epoch, got {value}"
        )));
    }
    Ok(())
}

/// Structural checks applied to every intention before it is encrypted.
/// Content is never interpreted beyond shape.
pub fn validate_intention(intention: &Intention) -> Result<(), AppError> {
    require_non_empty("text", &intention.text)?;
    require_max_chars("text", &intention.text, MAX_TEXT_CHARS)?;
    require_epoch_millis("timestamp", intention.timestamp)?;
    if let Some(Confidence::Score(score)) = &intention.confidence {
        if !score.is_finite() {
            return Err(AppError::Validation(format!(
                "confidence must be a finite number, got {score}"
            )));
        }
    }
    Ok(())
}
